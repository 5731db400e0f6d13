//! Application-level configuration loading: match rules, notification endpoints and categories.

use std::{collections::HashSet, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationSeconds, serde_as};
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::{
    category::{CATEGORY_COUNT, Category, default_categories},
    match_session::MatchRules,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "TRIVIA_DUEL_CONFIG_PATH";
const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    rules: MatchRules,
    notifications: NotificationConfig,
    categories: Vec<Category>,
}

/// Where outbox notifications are delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationConfig {
    /// Endpoint receiving push notifications, if any.
    pub push_url: Option<String>,
    /// Endpoint receiving transactional emails, if any.
    pub email_url: Option<String>,
    /// Delivery attempts before an entry is dead-lettered.
    pub max_attempts: u32,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            push_url: None,
            email_url: None,
            max_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
        }
    }
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match Self::from_json(&contents) {
                Ok(app_config) => {
                    info!(
                        path = %path.display(),
                        categories = app_config.categories.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Parse a configuration document, filling absent fields with defaults.
    pub fn from_json(contents: &str) -> serde_json::Result<Self> {
        let raw = serde_json::from_str::<RawConfig>(contents)?;
        Ok(raw.into())
    }

    /// Gameplay rules applied to every match.
    pub fn rules(&self) -> &MatchRules {
        &self.rules
    }

    /// Notification delivery settings.
    pub fn notifications(&self) -> &NotificationConfig {
        &self.notifications
    }

    /// Category reference data, always [`CATEGORY_COUNT`] entries.
    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    /// Look up a category by id.
    pub fn category(&self, id: Uuid) -> Option<&Category> {
        self.categories.iter().find(|category| category.id == id)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rules: MatchRules::default(),
            notifications: NotificationConfig::default(),
            categories: default_categories(),
        }
    }
}

#[serde_as]
#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    #[serde(default)]
    question_time_limit_secs: Option<Duration>,
    questions_per_spin: Option<usize>,
    streak_for_character_round: Option<u32>,
    characters_per_turn: Option<u8>,
    win_points: Option<u32>,
    #[serde(default)]
    notifications: RawNotifications,
    categories: Option<Vec<RawCategory>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawNotifications {
    push_url: Option<String>,
    email_url: Option<String>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
/// JSON representation of a single category inside the configuration file.
struct RawCategory {
    id: Option<Uuid>,
    name: String,
    icon: String,
    color: String,
}

impl From<RawCategory> for Category {
    fn from(value: RawCategory) -> Self {
        let mut category = Category::named(&value.name, &value.icon, &value.color);
        if let Some(id) = value.id {
            category.id = id;
        }
        category
    }
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = MatchRules::default();
        let rules = MatchRules {
            question_time_limit: value
                .question_time_limit_secs
                .filter(|limit| !limit.is_zero())
                .unwrap_or(defaults.question_time_limit),
            questions_per_spin: value
                .questions_per_spin
                .filter(|count| *count > 0)
                .unwrap_or(defaults.questions_per_spin),
            streak_for_character_round: value
                .streak_for_character_round
                .filter(|streak| *streak > 0)
                .unwrap_or(defaults.streak_for_character_round),
            characters_per_turn: value
                .characters_per_turn
                .filter(|count| *count > 0)
                .unwrap_or(defaults.characters_per_turn),
            win_points: value.win_points.unwrap_or(defaults.win_points),
        };

        let notifications = NotificationConfig {
            push_url: value.notifications.push_url.filter(|url| !url.is_empty()),
            email_url: value.notifications.email_url.filter(|url| !url.is_empty()),
            max_attempts: value
                .notifications
                .max_attempts
                .filter(|attempts| *attempts > 0)
                .unwrap_or(DEFAULT_MAX_DELIVERY_ATTEMPTS),
        };

        let categories = match value.categories {
            Some(raw) => {
                let categories = raw.into_iter().map(Category::from).collect::<Vec<_>>();
                let distinct = categories.iter().map(|c| c.id).collect::<HashSet<_>>();
                if categories.len() == CATEGORY_COUNT && distinct.len() == CATEGORY_COUNT {
                    categories
                } else {
                    warn!(
                        count = categories.len(),
                        expected = CATEGORY_COUNT,
                        "configured categories rejected; using built-in defaults"
                    );
                    default_categories()
                }
            }
            None => default_categories(),
        };

        Self {
            rules,
            notifications,
            categories,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_json("{}").unwrap();
        assert_eq!(config.rules(), &MatchRules::default());
        assert_eq!(config.notifications(), &NotificationConfig::default());
        assert_eq!(config.categories().len(), CATEGORY_COUNT);
    }

    #[test]
    fn overrides_are_applied() {
        let config = AppConfig::from_json(
            r#"{
                "question_time_limit_secs": 30,
                "win_points": 50,
                "notifications": { "push_url": "http://push.local/send", "max_attempts": 2 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.rules().question_time_limit, Duration::from_secs(30));
        assert_eq!(config.rules().win_points, 50);
        assert_eq!(
            config.notifications().push_url.as_deref(),
            Some("http://push.local/send")
        );
        assert_eq!(config.notifications().email_url, None);
        assert_eq!(config.notifications().max_attempts, 2);
    }

    #[test]
    fn wrong_category_count_falls_back() {
        let config = AppConfig::from_json(
            r##"{ "categories": [ { "name": "Solo", "icon": "x", "color": "#000" } ] }"##,
        )
        .unwrap();
        assert_eq!(config.categories(), default_categories().as_slice());
    }

    #[test]
    fn zero_limits_are_ignored() {
        let config =
            AppConfig::from_json(r#"{ "question_time_limit_secs": 0, "questions_per_spin": 0 }"#)
                .unwrap();
        assert_eq!(config.rules(), &MatchRules::default());
    }
}
