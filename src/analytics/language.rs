//! Visitor language detection.
//!
//! Precedence: explicit `lang` query parameter, then the best
//! Accept-Language entry by q-value, then the resolved site locale. The
//! stored value is the lowercased primary subtag (`en`, not `en-US`).

use crate::models::ClickContext;

pub fn detect_language(ctx: &ClickContext) -> Option<String> {
    ctx.lang_param
        .as_deref()
        .map(primary_subtag)
        .or_else(|| ctx.accept_language.as_deref().and_then(parse_accept_language))
        .or_else(|| ctx.locale.as_deref().map(primary_subtag))
        .filter(|s| !s.is_empty())
}

/// Highest-quality language in an Accept-Language header. Entries without a
/// q parameter default to 1.0; unparseable q-values drop the entry.
pub fn parse_accept_language(header: &str) -> Option<String> {
    let mut best: Option<(f32, String)> = None;

    for entry in header.split(',') {
        let mut parts = entry.split(';');
        let tag = parts.next()?.trim();
        if tag.is_empty() || tag == "*" {
            continue;
        }

        let mut quality = 1.0f32;
        for param in parts {
            if let Some(q) = param.trim().strip_prefix("q=") {
                match q.parse::<f32>() {
                    Ok(v) => quality = v,
                    Err(_) => {
                        quality = -1.0;
                        break;
                    }
                }
            }
        }
        if quality <= 0.0 {
            continue;
        }

        // Strictly-greater keeps the first of equally-weighted entries,
        // matching header order preference.
        if best.as_ref().is_none_or(|(bq, _)| quality > *bq) {
            best = Some((quality, primary_subtag(tag)));
        }
    }

    best.map(|(_, tag)| tag)
}

fn primary_subtag(tag: &str) -> String {
    tag.split(['-', '_'])
        .next()
        .unwrap_or(tag)
        .trim()
        .to_ascii_lowercase()
}
