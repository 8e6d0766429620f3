//! Signal to remediation mapping

use crate::model::fatigue::{
    ActionPriority, FatigueSeverity, FatigueSignal, FatigueSignalType, RemediationAction,
    RemediationStep,
};
use std::collections::BTreeMap;

pub fn priority_for(severity: FatigueSeverity) -> ActionPriority {
    match severity {
        FatigueSeverity::Critical => ActionPriority::Immediate,
        FatigueSeverity::Severe => ActionPriority::High,
        FatigueSeverity::Moderate => ActionPriority::Medium,
        FatigueSeverity::Mild | FatigueSeverity::None => ActionPriority::Low,
    }
}

/// Action for one signal
pub fn action_for(signal_type: FatigueSignalType, severity: FatigueSeverity) -> RemediationAction {
    use FatigueSeverity as S;
    use FatigueSignalType as T;

    match (signal_type, severity) {
        (_, S::None) => RemediationAction::Monitor,
        (T::CtrDecline, S::Severe | S::Critical) => RemediationAction::RefreshCreative,
        (T::CtrDecline, S::Moderate) => RemediationAction::LaunchVariantTest,
        (T::CtrDecline, S::Mild) => RemediationAction::Monitor,
        (T::CvrDecline, S::Mild) => RemediationAction::Monitor,
        (T::CvrDecline, S::Moderate | S::Severe | S::Critical) => {
            RemediationAction::ReviewLandingPage
        }
        (T::FrequencyIncrease, S::Critical) => RemediationAction::PauseCreative,
        (T::FrequencyIncrease, S::Mild | S::Moderate | S::Severe) => {
            RemediationAction::ExpandAudience
        }
        (T::CpcIncrease, S::Mild) => RemediationAction::Monitor,
        (T::CpcIncrease, S::Moderate | S::Severe | S::Critical) => RemediationAction::ReviewBidding,
        (T::CreativeStaleness, S::Severe | S::Critical) => RemediationAction::RefreshCreative,
        (T::CreativeStaleness, S::Moderate) => RemediationAction::LaunchVariantTest,
        (T::CreativeStaleness, S::Mild) => RemediationAction::Monitor,
        (T::QualityScoreDecline, S::Mild) => RemediationAction::Monitor,
        (T::QualityScoreDecline, S::Moderate | S::Severe | S::Critical) => {
            RemediationAction::ReviewLandingPage
        }
    }
}

fn describe(action: RemediationAction, signal: &FatigueSignal) -> String {
    let source = signal.signal_type.as_str();
    let severity = signal.severity.as_str();
    match action {
        RemediationAction::PauseCreative => format!("Pause the creative ({} {})", source, severity),
        RemediationAction::RefreshCreative => {
            format!("Replace with a refreshed creative ({} {})", source, severity)
        }
        RemediationAction::LaunchVariantTest => {
            format!("Launch an A/B test against a new variant ({} {})", source, severity)
        }
        RemediationAction::ExpandAudience => {
            format!("Expand targeting to reduce frequency ({} {})", source, severity)
        }
        RemediationAction::ReviewBidding => format!("Review bidding strategy ({} {})", source, severity),
        RemediationAction::ReviewLandingPage => {
            format!("Review landing page and offer ({} {})", source, severity)
        }
        RemediationAction::Monitor => format!("Keep monitoring ({} {})", source, severity),
    }
}

/// Deduplicated remediation plan, most urgent first
///
/// A CRITICAL verdict always carries an immediate pause.
pub fn plan(signals: &[FatigueSignal], verdict: FatigueSeverity) -> Vec<RemediationStep> {
    let mut by_action: BTreeMap<RemediationAction, RemediationStep> = BTreeMap::new();

    for signal in signals {
        let action = action_for(signal.signal_type, signal.severity);
        let step = RemediationStep {
            action,
            priority: priority_for(signal.severity),
            source: signal.signal_type,
            description: describe(action, signal),
        };
        match by_action.get(&action) {
            Some(existing) if existing.priority <= step.priority => {}
            _ => {
                by_action.insert(action, step);
            }
        }
    }

    if verdict == FatigueSeverity::Critical {
        if let Some(worst) = signals.iter().max_by_key(|s| s.severity) {
            by_action
                .entry(RemediationAction::PauseCreative)
                .or_insert_with(|| RemediationStep {
                    action: RemediationAction::PauseCreative,
                    priority: ActionPriority::Immediate,
                    source: worst.signal_type,
                    description: describe(RemediationAction::PauseCreative, worst),
                })
                .priority = ActionPriority::Immediate;
        }
    }

    let mut steps: Vec<RemediationStep> = by_action.into_values().collect();
    steps.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.action.cmp(&b.action)));
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(signal_type: FatigueSignalType, severity: FatigueSeverity) -> FatigueSignal {
        FatigueSignal {
            signal_type,
            severity,
            confidence: 0.9,
            baseline_value: 0.05,
            recent_value: 0.03,
            delta: -0.4,
            score: -3.0,
            recommendation: String::new(),
        }
    }

    #[test]
    fn test_every_signal_type_has_an_action_per_severity() {
        let severities = [
            FatigueSeverity::Mild,
            FatigueSeverity::Moderate,
            FatigueSeverity::Severe,
            FatigueSeverity::Critical,
        ];
        for ty in FatigueSignalType::ALL {
            for severity in severities {
                let action = action_for(ty, severity);
                if severity >= FatigueSeverity::Moderate {
                    assert_ne!(action, RemediationAction::Monitor, "{:?} {:?}", ty, severity);
                }
                if severity == FatigueSeverity::Mild {
                    assert!(
                        matches!(action, RemediationAction::Monitor | RemediationAction::ExpandAudience),
                        "{:?} {:?}",
                        ty,
                        severity
                    );
                }
            }
        }
    }

    #[test]
    fn test_plan_dedupes_and_keeps_most_urgent() {
        let steps = plan(
            &[
                signal(FatigueSignalType::CtrDecline, FatigueSeverity::Moderate),
                signal(FatigueSignalType::CreativeStaleness, FatigueSeverity::Severe),
                signal(FatigueSignalType::CvrDecline, FatigueSeverity::Mild),
            ],
            FatigueSeverity::Moderate,
        );

        let actions: Vec<(RemediationAction, ActionPriority)> =
            steps.iter().map(|s| (s.action, s.priority)).collect();
        assert_eq!(
            actions,
            vec![
                (RemediationAction::RefreshCreative, ActionPriority::High),
                (RemediationAction::LaunchVariantTest, ActionPriority::Medium),
                (RemediationAction::Monitor, ActionPriority::Low),
            ]
        );
    }

    #[test]
    fn test_critical_verdict_adds_immediate_pause() {
        let steps = plan(
            &[signal(FatigueSignalType::CtrDecline, FatigueSeverity::Critical)],
            FatigueSeverity::Critical,
        );
        assert_eq!(steps[0].action, RemediationAction::PauseCreative);
        assert_eq!(steps[0].priority, ActionPriority::Immediate);
        assert!(steps
            .iter()
            .any(|s| s.action == RemediationAction::RefreshCreative));
    }
}
