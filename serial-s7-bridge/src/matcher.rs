//! Maps a response line back to the command that produced it.

use std::sync::Arc;

use crate::command::CommandSpec;

/// Remembers the last command sent and resolves responses against it first.
///
/// Owned by exactly one poller; never shared.
#[derive(Debug, Default)]
pub struct ResponseMatcher {
    pending: Option<Arc<CommandSpec>>,
}

impl ResponseMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the command about to be transmitted.
    pub fn set_pending(&mut self, spec: Arc<CommandSpec>) {
        self.pending = Some(spec);
    }

    pub fn pending(&self) -> Option<&Arc<CommandSpec>> {
        self.pending.as_ref()
    }

    /// Resolve `text` to a command.
    ///
    /// The pending command wins when its pattern matches. Otherwise the
    /// first entry of `specs`, in order, whose pattern matches is returned.
    /// Mismatches against the pending command are tolerated because
    /// instruments occasionally answer out of turn.
    pub fn match_response(
        &self,
        text: &str,
        specs: &[Arc<CommandSpec>],
    ) -> Option<Arc<CommandSpec>> {
        if let Some(pending) = &self.pending {
            if pending.accepts(text) {
                return Some(pending.clone());
            }
        }

        specs.iter().find(|spec| spec.accepts(text)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandKind;

    fn specs() -> Vec<Arc<CommandSpec>> {
        vec![
            Arc::new(
                CommandSpec::new("RT\r", r"^-?\d+(\.\d+)?C", 0, CommandKind::NumericScalar)
                    .unwrap(),
            ),
            Arc::new(CommandSpec::new("RUFS\r", r"^(\d+ )+\d+", 4, CommandKind::ByteList).unwrap()),
        ]
    }

    #[test]
    fn test_pending_preferred() {
        let specs = specs();
        let mut matcher = ResponseMatcher::new();
        matcher.set_pending(specs[1].clone());

        let matched = matcher.match_response("0 0 0 13 64\r", &specs).unwrap();
        assert!(Arc::ptr_eq(&matched, &specs[1]));
    }

    #[test]
    fn test_falls_back_to_list_order() {
        let specs = specs();
        let mut matcher = ResponseMatcher::new();
        matcher.set_pending(specs[1].clone());

        // Answer to the previous command arriving late.
        let matched = matcher.match_response("20.0C\r", &specs).unwrap();
        assert!(Arc::ptr_eq(&matched, &specs[0]));
    }

    #[test]
    fn test_first_match_wins_without_pending() {
        let overlapping = vec![
            Arc::new(CommandSpec::new("A\r", r"\d", 0, CommandKind::NumericScalar).unwrap()),
            Arc::new(CommandSpec::new("B\r", r"\d+", 8, CommandKind::NumericScalar).unwrap()),
        ];
        let matcher = ResponseMatcher::new();

        let matched = matcher.match_response("42\r", &overlapping).unwrap();
        assert_eq!(matched.send_text(), "A\r");
    }

    #[test]
    fn test_no_match() {
        let specs = specs();
        let mut matcher = ResponseMatcher::new();
        matcher.set_pending(specs[0].clone());
        assert!(matcher.match_response("ERR\r", &specs).is_none());
        assert!(matcher.match_response("", &specs).is_none());
    }

    #[test]
    fn test_pending_outside_list_still_matches() {
        let extra =
            Arc::new(CommandSpec::new("ID\r", r"^ACME", 0, CommandKind::Unsupported).unwrap());
        let mut matcher = ResponseMatcher::new();
        matcher.set_pending(extra.clone());

        let matched = matcher.match_response("ACME 3000\r", &specs()).unwrap();
        assert!(Arc::ptr_eq(&matched, &extra));
    }
}
