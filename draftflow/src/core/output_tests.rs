//! Tests for StageOutput.

#[cfg(test)]
mod tests {
    use crate::core::{AuditEntry, AuditError, ErrorTag, StageOutput};
    use crate::state::StateDelta;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_output_ok_empty() {
        let output = StageOutput::ok_empty();
        assert!(output.delta.is_empty());
        assert!(output.audit.is_empty());
        assert!(!output.is_degraded());
    }

    #[test]
    fn test_output_ok_with_delta() {
        let delta = StateDelta::new()
            .with("syllabus", json!({"episodes": []}))
            .with("count", json!(3));

        let output = StageOutput::ok(delta);
        assert_eq!(output.get("syllabus"), Some(&json!({"episodes": []})));
        assert_eq!(output.get("count"), Some(&json!(3)));
    }

    #[test]
    fn test_output_ok_value() {
        let output = StageOutput::ok_value("result", json!({"nested": true}));
        assert_eq!(output.get("result"), Some(&json!({"nested": true})));
    }

    #[test]
    fn test_record_counts_degraded() {
        let mut output = StageOutput::ok_empty();
        output.record(AuditEntry::new("s", "s:1"), false);
        output.record(
            AuditEntry::new("s", "s:2")
                .with_error(AuditError::new(ErrorTag::ParseError, "nothing parsed")),
            true,
        );

        assert_eq!(output.audit.len(), 2);
        assert_eq!(output.degraded, 1);
        assert!(output.is_degraded());
        assert_eq!(output.audit[1].action, "s:2");
    }

    #[test]
    fn test_output_builders() {
        let output = StageOutput::ok_empty()
            .with_degraded(2)
            .with_audit(vec![AuditEntry::new("s", "s:1")])
            .add_metadata("items", json!(6));

        assert_eq!(output.degraded, 2);
        assert_eq!(output.audit.len(), 1);
        assert_eq!(output.metadata.get("items"), Some(&json!(6)));
    }

    #[test]
    fn test_output_serialization() {
        let output = StageOutput::ok_value("x", json!(42)).with_degraded(1);
        let text = serde_json::to_string(&output).unwrap();
        let back: StageOutput = serde_json::from_str(&text).unwrap();
        assert_eq!(output, back);
    }
}
