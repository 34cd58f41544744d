use crate::webhook::AssignmentEvent;

/// Desk URL of the referenced document, e.g. `{base}/app/sales-order/SO-0001`.
pub fn document_url(erp_base: &str, reference_type: &str, reference_name: &str) -> String {
    let slug = reference_type
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase();
    format!(
        "{}/app/{}/{}",
        erp_base.trim_end_matches('/'),
        slug,
        urlencoding::encode(reference_name)
    )
}

pub fn compose_assignment_message(
    display_name: &str,
    event: &AssignmentEvent,
    document_url: &str,
) -> String {
    let reference_type = event.reference_type.as_deref().unwrap_or_default();
    let reference_name = event.reference_name.as_deref().unwrap_or_default();
    let assigner = event.assigner_name.as_deref().unwrap_or_default();

    let mut message = format!(
        "👋 Hey {}, you’ve been assigned a new task!\n\n",
        display_name
    );
    if let Some(due_date) = event.due_date.as_deref() {
        message.push_str(&format!("*📅 Date:* {}\n", due_date));
    }
    message.push_str(&format!("*📌 Type:* {}\n", reference_type));
    message.push_str(&format!(
        "*🆔 Reference:* [{}]({})\n",
        reference_name, document_url
    ));
    message.push_str(&format!("*👤 Assigned By:* {}\n\n", assigner));
    message.push_str("Please check it out and take the necessary action.");
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(due_date: Option<&str>) -> AssignmentEvent {
        AssignmentEvent {
            recipient_email: Some("a@x.com".to_string()),
            reference_type: Some("Task".to_string()),
            reference_name: Some("T-1".to_string()),
            assigner_name: Some("Bob".to_string()),
            due_date: due_date.map(str::to_string),
        }
    }

    #[test]
    fn document_url_uses_desk_route() {
        assert_eq!(
            document_url("https://erp.example.com/", "Sales Order", "SO-0001"),
            "https://erp.example.com/app/sales-order/SO-0001"
        );
        assert_eq!(
            document_url("https://erp.example.com", "Task", "T 1"),
            "https://erp.example.com/app/task/T%201"
        );
    }

    #[test]
    fn message_includes_all_fields() {
        let url = "https://erp.example.com/app/task/T-1";
        let message = compose_assignment_message("Alice Smith", &event(Some("2024-01-01")), url);

        assert!(message.starts_with("👋 Hey Alice Smith, you’ve been assigned a new task!"));
        assert!(message.contains("*📅 Date:* 2024-01-01\n"));
        assert!(message.contains("*📌 Type:* Task\n"));
        assert!(message.contains("*🆔 Reference:* [T-1](https://erp.example.com/app/task/T-1)\n"));
        assert!(message.contains("*👤 Assigned By:* Bob\n\n"));
        assert!(message.ends_with("Please check it out and take the necessary action."));
    }

    #[test]
    fn date_line_is_omitted_without_due_date() {
        let message = compose_assignment_message("Alice Smith", &event(None), "u");
        assert!(!message.contains("Date:"));
    }
}
