//! Message template rendering.
//!
//! Supports `{{name}}` (contact name, falling back to the phone number) and
//! `{{phone}}`.

/// Render a campaign template for one contact.
pub fn render(template: &str, name: Option<&str>, phone: &str) -> String {
    let name = match name {
        Some(n) if !n.trim().is_empty() => n,
        _ => phone,
    };
    template.replace("{{name}}", name).replace("{{phone}}", phone)
}
