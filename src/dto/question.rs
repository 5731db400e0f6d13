use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{dao::models::QuestionEntity, state::category::Category};

/// Bulk import of questions into the bank.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ImportQuestionsRequest {
    #[validate(length(min = 1), nested)]
    pub questions: Vec<QuestionInput>,
}

/// A question as supplied by content authors.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
#[validate(schema(function = "validate_correct_index"))]
pub struct QuestionInput {
    /// Optional stable id; generated when omitted.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub category_id: Uuid,
    #[validate(range(min = 1, max = 3))]
    pub level: u8,
    #[validate(length(min = 1))]
    pub text: String,
    #[validate(length(min = 2))]
    pub options: Vec<String>,
    pub correct_index: usize,
}

fn validate_correct_index(input: &QuestionInput) -> Result<(), ValidationError> {
    if input.correct_index < input.options.len() {
        Ok(())
    } else {
        let mut err = ValidationError::new("correct_index_range");
        err.message = Some(
            format!(
                "correct_index {} is out of range for {} options",
                input.correct_index,
                input.options.len()
            )
            .into(),
        );
        Err(err)
    }
}

impl From<QuestionInput> for QuestionEntity {
    fn from(value: QuestionInput) -> Self {
        Self {
            id: value.id.unwrap_or_else(Uuid::new_v4),
            category_id: value.category_id,
            level: value.level,
            text: value.text,
            options: value.options,
            correct_index: value.correct_index,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImportQuestionsResponse {
    pub imported: usize,
}

/// Category reference data.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CategoryView {
    pub id: Uuid,
    pub name: String,
    /// Icon name used by the frontend.
    pub icon: String,
    /// CSS color used by the frontend.
    pub color: String,
}

impl From<&Category> for CategoryView {
    fn from(category: &Category) -> Self {
        Self {
            id: category.id,
            name: category.name.clone(),
            icon: category.icon.clone(),
            color: category.color.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(options: usize, correct_index: usize) -> QuestionInput {
        QuestionInput {
            id: None,
            category_id: Uuid::new_v4(),
            level: 1,
            text: "Who painted the Mona Lisa?".into(),
            options: (0..options).map(|i| format!("option {i}")).collect(),
            correct_index,
        }
    }

    #[test]
    fn accepts_well_formed_question() {
        assert!(input(4, 3).validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_answer() {
        assert!(input(4, 4).validate().is_err());
    }

    #[test]
    fn rejects_single_option() {
        assert!(input(1, 0).validate().is_err());
    }

    #[test]
    fn nested_errors_bubble_up() {
        let request = ImportQuestionsRequest {
            questions: vec![input(3, 0), input(2, 5)],
        };
        assert!(request.validate().is_err());
        assert!(
            ImportQuestionsRequest {
                questions: Vec::new()
            }
            .validate()
            .is_err()
        );
    }
}
