/// Built-in specification blueprints that seed new draft workflows.

use crate::workflow::types::WorkflowSpecification;
use serde_json::json;

/// Identifiers of the available blueprints
pub const TEMPLATE_IDS: &[&str] = &["slack-notif", "ai-lead-analyzer"];

/// Build the blueprint specification for a template id
pub fn blueprint(template_id: &str) -> Option<WorkflowSpecification> {
    let value = match template_id {
        "slack-notif" => json!({
            "version": "1.0.0",
            "nodes": [
                { "id": "1", "type": "TRIGGER", "name": "Webhook",
                  "position": { "x": 100, "y": 100 },
                  "data": { "type": "WEBHOOK", "path": "internal-slack-trigger", "method": "POST" } },
                { "id": "2", "type": "ACTION", "name": "Slack Bot",
                  "position": { "x": 400, "y": 100 },
                  "data": { "channel": "#general" } }
            ],
            "edges": [{ "id": "e1-2", "source": "1", "target": "2" }],
            "metadata": { "expectedTimeout": 10, "retries": 3 }
        }),
        "ai-lead-analyzer" => json!({
            "version": "1.0.0",
            "nodes": [
                { "id": "1", "type": "TRIGGER", "name": "Lead Webhook",
                  "position": { "x": 50, "y": 100 }, "data": {} },
                { "id": "2", "type": "ACTION", "name": "OpenAI Researcher",
                  "position": { "x": 300, "y": 100 }, "data": { "model": "gpt-4o" } },
                { "id": "3", "type": "ACTION", "name": "Slack Post",
                  "position": { "x": 550, "y": 100 }, "data": {} }
            ],
            "edges": [
                { "id": "e1-2", "source": "1", "target": "2" },
                { "id": "e2-3", "source": "2", "target": "3" }
            ],
            "metadata": { "expectedTimeout": 60, "retries": 2 }
        }),
        _ => return None,
    };

    serde_json::from_value(value).ok()
}

/// Default display name for a workflow created from a template; only the first dash becomes a space
pub fn default_name(template_id: &str) -> String {
    format!("My {}", template_id.replacen('-', " ", 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::validator::validate_structure;

    #[test]
    fn test_every_template_decodes_and_is_structurally_valid() {
        for id in TEMPLATE_IDS {
            let spec = blueprint(id).unwrap_or_else(|| panic!("template {} should decode", id));
            assert!(validate_structure(&spec).is_valid(), "template {}", id);
        }
    }

    #[test]
    fn test_unknown_template() {
        assert!(blueprint("nope").is_none());
        assert_eq!(default_name("slack-notif"), "My slack notif");
    }

    #[test]
    fn test_default_name_replaces_first_dash_only() {
        assert_eq!(default_name("ai-lead-analyzer"), "My ai lead-analyzer");
        assert_eq!(default_name("plain"), "My plain");
    }
}
