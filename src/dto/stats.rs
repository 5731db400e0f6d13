use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::UserStatsEntity;

/// Aggregated results of a user over all finished matches.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
pub struct UserStatsView {
    pub user_id: Uuid,
    pub games_played: u32,
    pub games_won: u32,
    pub games_lost: u32,
    pub total_points: u64,
    pub correct_answers: u32,
    pub wrong_answers: u32,
    pub characters_collected: u32,
    pub best_streak: u32,
}

impl From<UserStatsEntity> for UserStatsView {
    fn from(value: UserStatsEntity) -> Self {
        Self {
            user_id: value.user_id,
            games_played: value.games_played,
            games_won: value.games_won,
            games_lost: value.games_lost,
            total_points: value.total_points,
            correct_answers: value.correct_answers,
            wrong_answers: value.wrong_answers,
            characters_collected: value.characters_collected,
            best_streak: value.best_streak,
        }
    }
}
