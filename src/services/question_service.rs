use std::{collections::HashSet, path::Path};

use rand::{rng, seq::SliceRandom};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{match_store::MatchStore, models::QuestionEntity},
    dto::{
        question::{CategoryView, QuestionInput},
        validation::validate_level,
    },
    error::ServiceError,
    state::SharedState,
};

/// Category reference data.
pub fn list_categories(state: &SharedState) -> Vec<CategoryView> {
    state
        .config()
        .categories()
        .iter()
        .map(CategoryView::from)
        .collect()
}

/// Validate and store a batch of questions. Nothing is stored when one is invalid.
pub async fn import_questions(
    state: &SharedState,
    inputs: Vec<QuestionInput>,
) -> Result<usize, ServiceError> {
    let known = state
        .config()
        .categories()
        .iter()
        .map(|category| category.id)
        .collect::<HashSet<_>>();

    let questions = inputs
        .into_iter()
        .enumerate()
        .map(|(index, input)| check_question(index, input, &known))
        .collect::<Result<Vec<_>, _>>()?;

    let store = state.require_store().await?;
    let count = questions.len();
    store.save_questions(questions).await?;
    info!(count, "questions imported");
    Ok(count)
}

/// Import the JSON question bank at `path`: either an array of questions or
/// `{ "questions": [...] }`.
pub async fn import_seed_file(state: &SharedState, path: &Path) -> Result<usize, ServiceError> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum SeedFile {
        Bare(Vec<QuestionInput>),
        Wrapped { questions: Vec<QuestionInput> },
    }

    let contents = tokio::fs::read_to_string(path).await.map_err(|err| {
        ServiceError::InvalidInput(format!("cannot read `{}`: {err}", path.display()))
    })?;
    let questions = match serde_json::from_str::<SeedFile>(&contents) {
        Ok(SeedFile::Bare(questions)) | Ok(SeedFile::Wrapped { questions }) => questions,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "invalid question seed file");
            return Err(ServiceError::InvalidInput(format!(
                "cannot parse `{}`: {err}",
                path.display()
            )));
        }
    };
    import_questions(state, questions).await
}

fn check_question(
    index: usize,
    input: QuestionInput,
    known: &HashSet<Uuid>,
) -> Result<QuestionEntity, ServiceError> {
    let invalid = |message: String| ServiceError::InvalidInput(format!("question #{index}: {message}"));

    if !known.contains(&input.category_id) {
        return Err(invalid(format!("unknown category `{}`", input.category_id)));
    }
    validate_level(input.level).map_err(|err| invalid(err.to_string()))?;
    if input.text.trim().is_empty() {
        return Err(invalid("text must not be empty".into()));
    }
    if input.options.len() < 2 {
        return Err(invalid("at least two options are required".into()));
    }
    if input.correct_index >= input.options.len() {
        return Err(invalid(format!(
            "correct_index {} is out of range",
            input.correct_index
        )));
    }
    Ok(input.into())
}

/// Shuffled questions of a category at `level`, skipping those already asked,
/// at most `limit` long. Empty when the category is exhausted.
pub async fn fetch_sample(
    store: &dyn MatchStore,
    category_id: Uuid,
    level: u8,
    exclude: &[Uuid],
    limit: usize,
) -> Result<Vec<QuestionEntity>, ServiceError> {
    let mut pool = store
        .list_questions(category_id, level)
        .await?
        .into_iter()
        .filter(|question| !exclude.contains(&question.id))
        .collect::<Vec<_>>();
    pool.shuffle(&mut rng());
    pool.truncate(limit);
    Ok(pool)
}

/// Spin the wheel: try categories in random order and return the first one
/// that still has questions, with its sample.
pub async fn spin_category(
    store: &dyn MatchStore,
    mut categories: Vec<Uuid>,
    level: u8,
    exclude: &[Uuid],
    limit: usize,
) -> Result<Option<(Uuid, Vec<QuestionEntity>)>, ServiceError> {
    categories.shuffle(&mut rng());
    for category_id in categories {
        let sample = fetch_sample(store, category_id, level, exclude, limit).await?;
        if !sample.is_empty() {
            return Ok(Some((category_id, sample)));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::match_store::memory::MemoryMatchStore;

    fn question(category_id: Uuid, level: u8) -> QuestionEntity {
        QuestionEntity {
            id: Uuid::new_v4(),
            category_id,
            level,
            text: "Q".into(),
            options: vec!["a".into(), "b".into()],
            correct_index: 0,
        }
    }

    #[tokio::test]
    async fn sample_skips_asked_questions_and_other_levels() {
        let store = MemoryMatchStore::new();
        let category = Uuid::new_v4();
        let asked = question(category, 1);
        let fresh = question(category, 1);
        store
            .save_questions(vec![asked.clone(), fresh.clone(), question(category, 2)])
            .await
            .unwrap();

        let sample = fetch_sample(&store, category, 1, &[asked.id], 5)
            .await
            .unwrap();
        assert_eq!(sample, vec![fresh]);
    }

    #[tokio::test]
    async fn sample_is_bounded() {
        let store = MemoryMatchStore::new();
        let category = Uuid::new_v4();
        store
            .save_questions((0..10).map(|_| question(category, 1)).collect())
            .await
            .unwrap();
        let sample = fetch_sample(&store, category, 1, &[], 5).await.unwrap();
        assert_eq!(sample.len(), 5);
    }

    #[tokio::test]
    async fn spin_skips_exhausted_categories() {
        let store = MemoryMatchStore::new();
        let empty = Uuid::new_v4();
        let stocked = Uuid::new_v4();
        store
            .save_questions(vec![question(stocked, 3)])
            .await
            .unwrap();

        let (category, sample) = spin_category(&store, vec![empty, stocked], 3, &[], 5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(category, stocked);
        assert_eq!(sample.len(), 1);

        let none = spin_category(&store, vec![empty], 3, &[], 5).await.unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn rejects_unknown_category() {
        let known = HashSet::from([Uuid::new_v4()]);
        let input = QuestionInput {
            id: None,
            category_id: Uuid::new_v4(),
            level: 1,
            text: "Q".into(),
            options: vec!["a".into(), "b".into()],
            correct_index: 0,
        };
        assert!(matches!(
            check_question(0, input, &known),
            Err(ServiceError::InvalidInput(_))
        ));
    }
}
