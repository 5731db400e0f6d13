use uuid::Uuid;

/// Number of distinct categories a player must collect to win.
pub const CATEGORY_COUNT: usize = 6;

/// Themed question group whose token (character) can be collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Category {
    /// Stable identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Icon name used by the frontend.
    pub icon: String,
    /// CSS color used by the frontend.
    pub color: String,
}

impl Category {
    /// Build a category whose identifier is derived from its name, so restarts keep ids stable.
    pub fn named(name: &str, icon: &str, color: &str) -> Self {
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()),
            name: name.to_owned(),
            icon: icon.to_owned(),
            color: color.to_owned(),
        }
    }
}

/// Built-in reference data shipped with the binary.
pub fn default_categories() -> Vec<Category> {
    vec![
        Category::named("Ciencias", "flask", "#22c55e"),
        Category::named("Historia", "landmark", "#eab308"),
        Category::named("Geografía", "globe", "#3b82f6"),
        Category::named("Arte", "palette", "#ef4444"),
        Category::named("Deportes", "trophy", "#f97316"),
        Category::named("Entretenimiento", "clapperboard", "#ec4899"),
    ]
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn defaults_have_six_distinct_ids() {
        let categories = default_categories();
        assert_eq!(categories.len(), CATEGORY_COUNT);
        let ids = categories.iter().map(|c| c.id).collect::<HashSet<_>>();
        assert_eq!(ids.len(), CATEGORY_COUNT);
    }

    #[test]
    fn ids_are_stable() {
        assert_eq!(
            Category::named("Arte", "a", "b").id,
            Category::named("Arte", "c", "d").id
        );
    }
}
