use uuid::Uuid;

use crate::{
    dao::models::{TurnEntity, UserStatsEntity},
    dto::stats::UserStatsView,
    error::ServiceError,
    state::{SharedState, match_session::MatchSession},
};

/// Increments one finished match adds to a player's stats row.
pub fn match_delta(
    session: &MatchSession,
    player_id: Uuid,
    turns: &[TurnEntity],
    win_points: u32,
) -> Option<UserStatsEntity> {
    let player = session.player(player_id)?;
    let won = session.winner_id == Some(player_id);
    let (correct, wrong) = turns
        .iter()
        .filter(|turn| turn.player_id == player_id)
        .fold((0u32, 0u32), |(correct, wrong), turn| {
            if turn.correct {
                (correct + 1, wrong)
            } else {
                (correct, wrong + 1)
            }
        });

    Some(UserStatsEntity {
        user_id: player.user_id,
        games_played: 1,
        games_won: u32::from(won),
        games_lost: u32::from(!won),
        total_points: if won { u64::from(win_points) } else { 0 },
        correct_answers: correct,
        wrong_answers: wrong,
        characters_collected: u32::try_from(player.characters.len()).unwrap_or(u32::MAX),
        best_streak: player.best_streak,
    })
}

/// Stats increments of both players of a finished match.
///
/// The rows are deltas: the store adds them to whatever it holds when the
/// commit lands, so two matches finishing at once both count. `turns` must
/// already contain the turn record produced by the finishing command.
pub fn finalize_match(
    session: &MatchSession,
    turns: &[TurnEntity],
    win_points: u32,
) -> Vec<UserStatsEntity> {
    session
        .players
        .iter()
        .filter_map(|player| match_delta(session, player.id, turns, win_points))
        .collect()
}

/// Stats of a user; zeroes when they never finished a match.
pub async fn get_stats(state: &SharedState, user_id: Uuid) -> Result<UserStatsView, ServiceError> {
    let store = state.require_store().await?;
    let stats = store
        .find_stats(user_id)
        .await?
        .unwrap_or_else(|| UserStatsEntity {
            user_id,
            ..UserStatsEntity::default()
        });
    Ok(stats.into())
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn turn(player_id: Uuid, correct: bool) -> TurnEntity {
        TurnEntity {
            id: Uuid::new_v4(),
            match_id: Uuid::nil(),
            player_id,
            category_id: Uuid::new_v4(),
            question_id: Uuid::new_v4(),
            correct,
            timed_out: false,
            time_taken_ms: 0,
            streak_at_answer: 0,
            character_won: None,
            created_at: SystemTime::now(),
        }
    }

    #[test]
    fn winner_gets_points_and_loser_does_not() {
        let now = SystemTime::now();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let mut session = MatchSession::new(alice, 1, "ABCDEF".into(), now);
        session.join(bob, now).unwrap();
        session.forfeit(bob, now).unwrap();

        let alice_id = session.player_by_user(alice).unwrap().id;
        let bob_id = session.player_by_user(bob).unwrap().id;
        let turns = vec![
            turn(alice_id, true),
            turn(alice_id, false),
            turn(bob_id, false),
        ];

        let deltas = finalize_match(&session, &turns, 100);
        assert_eq!(deltas.len(), 2);
        let alice_delta = deltas.iter().find(|d| d.user_id == alice).unwrap();
        assert_eq!(alice_delta.games_played, 1);
        assert_eq!(alice_delta.games_won, 1);
        assert_eq!(alice_delta.total_points, 100);
        assert_eq!(alice_delta.correct_answers, 1);
        assert_eq!(alice_delta.wrong_answers, 1);

        let bob_delta = deltas.iter().find(|d| d.user_id == bob).unwrap();
        assert_eq!(bob_delta.games_lost, 1);
        assert_eq!(bob_delta.total_points, 0);
        assert_eq!(bob_delta.wrong_answers, 1);
    }

    #[test]
    fn deltas_accumulate_onto_previous_totals() {
        let now = SystemTime::now();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let mut session = MatchSession::new(alice, 1, "ABCDEF".into(), now);
        session.join(bob, now).unwrap();
        session.forfeit(bob, now).unwrap();
        let alice_id = session.player_by_user(alice).unwrap().id;

        let mut totals = UserStatsEntity {
            user_id: alice,
            games_played: 2,
            games_won: 1,
            games_lost: 1,
            total_points: 100,
            best_streak: 4,
            ..UserStatsEntity::default()
        };
        let delta = match_delta(&session, alice_id, &[turn(alice_id, true)], 100).unwrap();
        totals.accumulate(&delta);
        totals.accumulate(&delta);

        assert_eq!(totals.games_played, 4);
        assert_eq!(totals.games_won, 3);
        assert_eq!(totals.games_lost, 1);
        assert_eq!(totals.total_points, 300);
        assert_eq!(totals.correct_answers, 2);
        assert_eq!(totals.best_streak, 4);
    }

    #[test]
    fn unknown_player_has_no_delta() {
        let now = SystemTime::now();
        let session = MatchSession::new(Uuid::new_v4(), 1, "ABCDEF".into(), now);
        assert!(match_delta(&session, Uuid::new_v4(), &[], 100).is_none());
    }
}
