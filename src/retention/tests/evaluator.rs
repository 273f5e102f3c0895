use super::*;

#[test]
fn test_recent_episodes_are_always_kept() {
    for state in [None, Some(PlayState::Played), Some(PlayState::Unknown)] {
        assert_eq!(decide(0, 1, state), Verdict::KeepRecent);
        assert_eq!(decide(2, 3, state), Verdict::KeepRecent);
    }
}

#[test]
fn test_beyond_retention_follows_play_state() {
    assert_eq!(decide(3, 3, None), Verdict::Delete);
    assert_eq!(decide(3, 3, Some(PlayState::Played)), Verdict::Delete);
    assert_eq!(decide(3, 3, Some(PlayState::Unplayed)), Verdict::KeepUnplayed);
    assert_eq!(decide(3, 3, Some(PlayState::Unknown)), Verdict::KeepUnknown);
}

#[tokio::test]
async fn test_age_based_plan_keeps_most_recent() {
    // Jan 3, Jan 2, Jan 1 with retention 2
    let plan = evaluate(vec![candidate(3), candidate(2), candidate(1)], 2, None).await;

    let deleted: Vec<_> = plan.to_delete().map(|c| c.id).collect();
    assert_eq!(deleted, vec![DownloadId(1)]);
    assert_eq!(plan.count(Verdict::KeepRecent), 2);
}

#[tokio::test]
async fn test_age_based_plan_keeps_min_of_n_and_count() {
    for keep in 1..=5usize {
        let candidates: Vec<_> = (1..=3).rev().map(candidate).collect();
        let plan = evaluate(candidates, keep, None).await;

        assert_eq!(plan.count(Verdict::KeepRecent), keep.min(3));
        assert_eq!(plan.to_delete().count(), 3 - keep.min(3));
    }
}

#[tokio::test]
async fn test_oracle_only_consulted_beyond_retention() {
    let oracle = FakeOracle::new(&[
        ("ep-1.mp3", PlayState::Played),
        ("ep-2.mp3", PlayState::Unplayed),
        ("ep-4.mp3", PlayState::Played),
    ]);
    let candidates = vec![candidate(4), candidate(3), candidate(2), candidate(1)];

    let plan = evaluate(candidates, 1, Some(&oracle)).await;

    assert_eq!(oracle.lookups(), 3, "the newest is never looked up");
    let verdicts: Vec<_> = plan.decisions.iter().map(|(_, v)| *v).collect();
    assert_eq!(
        verdicts,
        vec![
            Verdict::KeepRecent,
            Verdict::KeepUnknown,
            Verdict::KeepUnplayed,
            Verdict::Delete,
        ]
    );
}

#[tokio::test]
async fn test_unknown_never_deletes_while_played_does() {
    let unknown = FakeOracle::new(&[]);
    let played = FakeOracle::new(&[("ep-1.mp3", PlayState::Played)]);

    let plan = evaluate(vec![candidate(2), candidate(1)], 1, Some(&unknown)).await;
    assert_eq!(plan.to_delete().count(), 0);

    let plan = evaluate(vec![candidate(2), candidate(1)], 1, Some(&played)).await;
    let deleted: Vec<_> = plan.to_delete().map(|c| c.id).collect();
    assert_eq!(deleted, vec![DownloadId(1)]);
}

#[tokio::test]
async fn test_missing_path_is_unknown_with_oracle() {
    let oracle = FakeOracle::new(&[]);
    let mut old = candidate(1);
    old.file_path = None;

    let plan = evaluate(vec![candidate(2), old], 1, Some(&oracle)).await;

    assert_eq!(plan.count(Verdict::KeepUnknown), 1);
    assert_eq!(oracle.lookups(), 0);
}
