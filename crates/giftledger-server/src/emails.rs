//! Transactional email templates.
//!
//! Every interpolated value is HTML-escaped. The plain-text alternative is
//! derived from the body markup.

use crate::models::Locale;

/// Template keys as recorded in `email_log.template`.
pub const TEMPLATE_ORDER_PAID: &str = "order_paid";
pub const TEMPLATE_GIFT_CARD_RECIPIENT: &str = "gift_card_recipient";
pub const TEMPLATE_ADMIN_NEW_ORDER_PAID: &str = "admin_new_order_paid";
pub const TEMPLATE_ADMIN_REFUND: &str = "admin_refund";
pub const TEMPLATE_ADMIN_DISPUTE: &str = "admin_dispute";

/// Site details shown in the email shell.
#[derive(Debug, Clone, Default)]
pub struct Branding {
    pub site_name: String,
    pub site_url: String,
    pub support_email: Option<String>,
}

/// A rendered email, ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub template: &'static str,
    pub locale: Locale,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Escapes text for inclusion in HTML content or attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

/// Plain-text rendering of a body fragment: paragraphs become blank-line
/// separated, tags are dropped and entities decoded.
pub fn html_to_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        text.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('>') else {
            rest = "";
            break;
        };
        let tag = rest[start + 1..start + end].trim().to_ascii_lowercase();
        if tag == "/p" {
            text.push_str("\n\n");
        } else if tag.starts_with("br") {
            text.push('\n');
        }
        rest = &rest[start + end + 1..];
    }
    text.push_str(rest);

    let decoded = text
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&amp;", "&");

    let mut collapsed = String::with_capacity(decoded.len());
    let mut newlines = 0;
    for c in decoded.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                collapsed.push(c);
            }
        } else {
            newlines = 0;
            collapsed.push(c);
        }
    }
    collapsed.trim().to_string()
}

fn shell(branding: &Branding, locale: Locale, heading: &str, body_html: &str) -> String {
    let footer = match locale {
        Locale::Lt => "Jei turite klausimų, atsakykite į šį laišką.",
        Locale::En => "If you have questions, reply to this email.",
    };
    let mut links = Vec::new();
    if let Some(support) = branding.support_email.as_deref().filter(|s| !s.is_empty()) {
        links.push(format!(
            "<a href=\"mailto:{0}\">{0}</a>",
            escape_html(support)
        ));
    }
    if !branding.site_url.is_empty() {
        links.push(format!("<a href=\"{0}\">{0}</a>", escape_html(&branding.site_url)));
    }

    format!(
        "<!doctype html>\n<html lang=\"{lang}\">\n<head><meta charset=\"utf-8\" /><title>{heading}</title></head>\n\
         <body style=\"margin:0;padding:24px;background:#f6f6f6;color:#111111;font-family:Arial,Helvetica,sans-serif;\">\n\
         <div style=\"font-size:18px;font-weight:700;margin-bottom:12px;\">{site}</div>\n\
         <div style=\"background:#ffffff;border-radius:16px;padding:20px;\">\n\
         <h1 style=\"font-size:22px;margin:0 0 12px 0;\">{heading}</h1>\n{body}\n</div>\n\
         <div style=\"font-size:12px;color:#6b7280;padding-top:12px;\"><div>{footer}</div><div>{links}</div></div>\n\
         </body>\n</html>",
        lang = locale.as_str(),
        heading = escape_html(heading),
        site = escape_html(&branding.site_name),
        body = body_html,
        footer = escape_html(footer),
        links = links.join(" · "),
    )
}

fn render(
    branding: &Branding,
    template: &'static str,
    locale: Locale,
    subject: &str,
    body_html: String,
) -> RenderedEmail {
    RenderedEmail {
        template,
        locale,
        subject: subject.to_string(),
        html: shell(branding, locale, subject, &body_html),
        text: html_to_text(&body_html),
    }
}

/// Customer confirmation for a paid order.
pub fn order_paid(branding: &Branding, locale: Locale, total: &str) -> RenderedEmail {
    let (subject, thanks, label) = match locale {
        Locale::Lt => ("Užsakymas apmokėtas", "Ačiū! Jūsų užsakymas apmokėtas.", "Suma"),
        Locale::En => ("Order paid", "Thanks! Your order is paid.", "Total"),
    };
    let body = format!(
        "<p>{}</p>\n<p>{}: <b>{}</b></p>",
        escape_html(thanks),
        label,
        escape_html(total)
    );
    render(branding, TEMPLATE_ORDER_PAID, locale, subject, body)
}

/// Gift card code for its recipient (or the buyer).
pub fn gift_card_recipient(
    branding: &Branding,
    locale: Locale,
    code: &str,
    amount: &str,
    expires_on: &str,
) -> RenderedEmail {
    let body = match locale {
        Locale::Lt => format!(
            "<p>Jums padovanotas dovanų kuponas.</p>\n<p>Kodas: <b>{}</b><br/>Vertė: <b>{}</b><br/>Galioja iki: <b>{}</b></p>\n<p>Įveskite kodą krepšelyje apmokėjimo metu.</p>",
            escape_html(code),
            escape_html(amount),
            escape_html(expires_on)
        ),
        Locale::En => format!(
            "<p>You received a gift card.</p>\n<p>Code: <b>{}</b><br/>Value: <b>{}</b><br/>Expires on: <b>{}</b></p>\n<p>Enter the code in the cart during checkout.</p>",
            escape_html(code),
            escape_html(amount),
            escape_html(expires_on)
        ),
    };
    let subject = match locale {
        Locale::Lt => "Jums skirta dovanų kupono kortelė",
        Locale::En => "You received a gift card",
    };
    render(branding, TEMPLATE_GIFT_CARD_RECIPIENT, locale, subject, body)
}

/// Operator notice for a newly paid order. Always Lithuanian.
pub fn admin_new_order_paid(branding: &Branding, order_id: &str, total: &str) -> RenderedEmail {
    let body = format!(
        "<p>Gautas naujas apmokėtas užsakymas.</p>\n<p>Užsakymas: <b>{}</b><br/>Suma: <b>{}</b></p>",
        escape_html(order_id),
        escape_html(total)
    );
    render(
        branding,
        TEMPLATE_ADMIN_NEW_ORDER_PAID,
        Locale::Lt,
        "Naujas apmokėtas užsakymas",
        body,
    )
}

/// Operator notice for a refund.
pub fn admin_refund(branding: &Branding, order_id: &str, refunded: &str, full: bool) -> RenderedEmail {
    let kind = if full { "pilnas" } else { "dalinis" };
    let body = format!(
        "<p>Mokėjimų tiekėjas užregistravo grąžinimą ({}).</p>\n<p>Užsakymas: <b>{}</b><br/>Grąžinta: <b>{}</b></p>",
        kind,
        escape_html(order_id),
        escape_html(refunded)
    );
    render(branding, TEMPLATE_ADMIN_REFUND, Locale::Lt, "Grąžinimas (refund)", body)
}

/// Operator notice for a dispute.
pub fn admin_dispute(branding: &Branding, order_id: &str, reason: Option<&str>) -> RenderedEmail {
    let body = format!(
        "<p>Mokėjimų tiekėjas užregistravo ginčą (dispute).</p>\n<p>Užsakymas: <b>{}</b><br/>Priežastis: <b>{}</b></p>",
        escape_html(order_id),
        escape_html(reason.unwrap_or("-"))
    );
    render(branding, TEMPLATE_ADMIN_DISPUTE, Locale::Lt, "Ginčas (dispute)", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branding() -> Branding {
        Branding {
            site_name: "Studio".into(),
            site_url: "https://studio.example".into(),
            support_email: Some("help@studio.example".into()),
        }
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"Tom\" & 'Jerry'</b>"),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#039;Jerry&#039;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_html_to_text() {
        let text = html_to_text("<p>Hello</p>\n<p>Code: <b>A&amp;B</b><br/>Next</p>");
        assert_eq!(text, "Hello\n\nCode: A&B\nNext");
    }

    #[test]
    fn test_order_paid_localized() {
        let lt = order_paid(&branding(), Locale::Lt, "100.00 EUR");
        assert_eq!(lt.subject, "Užsakymas apmokėtas");
        assert_eq!(lt.template, TEMPLATE_ORDER_PAID);
        assert!(lt.html.contains("<html lang=\"lt\">"));
        assert!(lt.text.contains("Suma: 100.00 EUR"));

        let en = order_paid(&branding(), Locale::En, "100.00 EUR");
        assert_eq!(en.subject, "Order paid");
        assert!(en.text.contains("Total: 100.00 EUR"));
        assert!(en.html.contains("help@studio.example"));
    }

    #[test]
    fn test_gift_card_email_escapes_values() {
        let email = gift_card_recipient(&branding(), Locale::En, "<ABCD>", "50.00 EUR", "2027-01-31");
        assert!(email.html.contains("&lt;ABCD&gt;"));
        assert!(!email.html.contains("<ABCD>"));
        assert!(email.text.contains("Code: <ABCD>"));
    }

    #[test]
    fn test_admin_templates_are_lithuanian() {
        assert_eq!(admin_new_order_paid(&branding(), "o1", "1.00 EUR").locale, Locale::Lt);
        assert_eq!(admin_refund(&branding(), "o1", "1.00 EUR", true).template, TEMPLATE_ADMIN_REFUND);
        assert!(admin_dispute(&branding(), "o1", None).text.contains("Priežastis: -"));
    }
}
