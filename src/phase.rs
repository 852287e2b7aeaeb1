//! Phase identity: the fixed {plan, implement, review} sequence and the
//! trigger/in-progress labels each phase is biuniquely paired with.

use std::fmt;

/// One of the three fixed execution phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Plan,
    Implement,
    Review,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Plan, Phase::Implement, Phase::Review];

    /// The trigger label that starts this phase.
    pub fn trigger_label(self) -> &'static str {
        match self {
            Phase::Plan => "needs-plan",
            Phase::Implement => "ready",
            Phase::Review => "review-requested",
        }
    }

    /// The in-progress label that advertises this phase underway.
    pub fn in_progress_label(self) -> &'static str {
        match self {
            Phase::Plan => "planning",
            Phase::Implement => "implementing",
            Phase::Review => "reviewing",
        }
    }

    /// Resolve a phase from its in-progress label, the form `transition`
    /// hands back in `TransitionInfo::to`.
    pub fn from_in_progress_label(label: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| p.in_progress_label() == label)
    }

    /// Resolve a phase from its trigger label.
    pub fn from_trigger_label(label: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| p.trigger_label() == label)
    }

    /// Short slug used in window names and command templates (`plan`,
    /// `implement`, `review`).
    pub fn slug(self) -> &'static str {
        match self {
            Phase::Plan => "plan",
            Phase::Implement => "implement",
            Phase::Review => "review",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Phase> {
        match slug {
            "plan" => Some(Phase::Plan),
            "implement" => Some(Phase::Implement),
            "review" => Some(Phase::Review),
            _ => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Command template for launching the assistant for a given phase.
/// `{workspace}`, `{issue}`, and `{phase}` are substituted by the Phase
/// Executor before the command is handed to the multiplexer.
#[derive(Debug, Clone)]
pub struct PhaseCommand {
    pub template: String,
}

impl PhaseCommand {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn render(&self, workspace: &std::path::Path, issue: u64, phase: Phase) -> String {
        self.template
            .replace("{workspace}", &workspace.display().to_string())
            .replace("{issue}", &issue.to_string())
            .replace("{phase}", phase.slug())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_and_in_progress_labels_are_biunique() {
        for phase in Phase::ALL {
            assert_eq!(
                Phase::from_trigger_label(phase.trigger_label()),
                Some(phase)
            );
            assert_eq!(
                Phase::from_in_progress_label(phase.in_progress_label()),
                Some(phase)
            );
        }
    }

    #[test]
    fn unknown_labels_resolve_to_none() {
        assert_eq!(Phase::from_trigger_label("bug"), None);
        assert_eq!(Phase::from_in_progress_label("done"), None);
    }

    #[test]
    fn slug_round_trips() {
        for phase in Phase::ALL {
            assert_eq!(Phase::from_slug(phase.slug()), Some(phase));
        }
        assert_eq!(Phase::from_slug("nonsense"), None);
    }

    #[test]
    fn phase_command_renders_placeholders() {
        let cmd = PhaseCommand::new("claude --cwd {workspace} --issue {issue} --phase {phase}");
        let rendered = cmd.render(std::path::Path::new("/tmp/ws-7"), 7, Phase::Implement);
        assert_eq!(
            rendered,
            "claude --cwd /tmp/ws-7 --issue 7 --phase implement"
        );
    }
}
