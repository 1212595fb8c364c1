//! User-agent classification with a TTL'd parse cache.
//!
//! Redirect traffic repeats the same handful of user-agent strings, so
//! parsed results are cached by the raw string for a configurable TTL.

use std::time::Duration;

use moka::sync::Cache;
use woothee::parser::Parser;

const CACHE_CAPACITY: u64 = 10_000;

/// Parsed device/browser information for one user-agent string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub device_type: Option<String>,
    pub device_brand: Option<String>,
    pub device_model: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub browser_engine: Option<String>,
    pub client_type: Option<String>,
    pub is_mobile_app: bool,
    pub is_bot: bool,
    pub bot_name: Option<String>,
}

pub struct DeviceClassifier {
    parser: Parser,
    cache: Cache<String, Classification>,
}

impl DeviceClassifier {
    pub fn new(cache_ttl_secs: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(CACHE_CAPACITY)
            .time_to_live(Duration::from_secs(cache_ttl_secs))
            .build();
        Self {
            parser: Parser::new(),
            cache,
        }
    }

    /// Classify a user-agent string. An empty or unparseable string yields an
    /// all-unknown classification rather than an error.
    pub fn classify(&self, user_agent: &str) -> Classification {
        if user_agent.is_empty() {
            return Classification::default();
        }
        if let Some(hit) = self.cache.get(user_agent) {
            return hit;
        }

        let classification = self.parse(user_agent);
        self.cache
            .insert(user_agent.to_string(), classification.clone());
        classification
    }

    fn parse(&self, user_agent: &str) -> Classification {
        let Some(result) = self.parser.parse(user_agent) else {
            return Classification::default();
        };

        let known = |s: &str| {
            if s.is_empty() || s == "UNKNOWN" {
                None
            } else {
                Some(s.to_string())
            }
        };

        if result.category == "crawler" {
            // Bot traffic keeps only the bot flags; the analytic dimensions
            // stay NULL so breakdowns are not polluted.
            return Classification {
                is_bot: true,
                bot_name: known(result.name),
                ..Default::default()
            };
        }

        let browser = known(result.name);
        let is_mobile_app = is_app_wrapper(user_agent);
        let client_type = if is_mobile_app {
            Some("mobile_app".to_string())
        } else {
            browser.as_ref().map(|_| "browser".to_string())
        };

        Classification {
            device_type: known(result.category).map(|c| map_device_type(c, user_agent)),
            device_brand: known(result.vendor),
            device_model: None,
            os_name: known(result.os),
            os_version: known(&result.os_version),
            browser: browser.clone(),
            browser_version: known(&result.version),
            browser_engine: detect_engine(user_agent),
            client_type,
            is_mobile_app,
            is_bot: false,
            bot_name: None,
        }
    }
}

/// Map woothee categories onto the reported vocabulary (desktop, mobile,
/// tablet). Woothee files tablets under smartphone; the UA string tells
/// them apart.
fn map_device_type(category: String, user_agent: &str) -> String {
    let tabletish = user_agent.contains("iPad")
        || user_agent.contains("Tablet")
        || (user_agent.contains("Android") && !user_agent.contains("Mobile"));
    match category.as_str() {
        "pc" => "desktop".to_string(),
        "smartphone" if tabletish => "tablet".to_string(),
        "smartphone" | "mobilephone" => "mobile".to_string(),
        _ => category,
    }
}

fn detect_engine(user_agent: &str) -> Option<String> {
    let engine = if user_agent.contains("Trident") || user_agent.contains("MSIE") {
        "Trident"
    } else if user_agent.contains("Chrome/")
        || user_agent.contains("Chromium")
        || user_agent.contains("CriOS")
        || user_agent.contains("Edg/")
    {
        "Blink"
    } else if user_agent.contains("AppleWebKit") {
        "WebKit"
    } else if user_agent.contains("Gecko/") {
        "Gecko"
    } else {
        return None;
    };
    Some(engine.to_string())
}

/// In-app browser and webview markers.
const APP_MARKERS: &[&str] = &["; wv)", "FBAN", "FB_IAB", "Instagram", "MicroMessenger", "Line/"];

fn is_app_wrapper(user_agent: &str) -> bool {
    APP_MARKERS.iter().any(|m| user_agent.contains(m))
}
