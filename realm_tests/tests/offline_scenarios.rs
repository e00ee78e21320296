//! Movement scenarios over the demo realm with no server behind the client.

use std::time::Duration;

use realm_client::{
    movement::{AnimationState, Direction},
    pathfinding::PathFinder,
    presentation::{Fade, RoomChanged, ScreenFade},
};
use realm_shared::tile::TileCoordinate;
use realm_tests::{demo_game, frames_until, init_tracing};

// Nothing listens here; these tests never join.
const NOWHERE: &str = "127.0.0.1:9";

fn t(x: i32, y: i32) -> TileCoordinate {
    TileCoordinate::new(x, y)
}

/// Presses and releases `key`, then waits for the single step to finish.
async fn tap(game: &mut realm_client::GameplayController, key: &str) {
    assert!(game.key_down(key));
    game.key_up(key);
    assert!(frames_until(game, Duration::from_secs(5), |g| !g.local().is_walking()).await);
}

#[tokio::test]
async fn move_into_impassable_tile_is_refused() -> anyhow::Result<()> {
    init_tracing();
    let mut game = demo_game(NOWHERE, "alice")?;
    let start = game.local().current_tile();
    let before = game.local().animation();

    let finder = PathFinder::new(game.world().bounds());
    assert_eq!(finder.find_path(start, t(1, 3), game.world().blocked()), None);

    assert!(game.click_tile(t(1, 3)));
    for _ in 0..30 {
        game.frame(realm_tests::FRAME);
    }
    assert_eq!(game.local().current_tile(), start);
    assert_eq!(game.local().animation(), before);
    assert!(!game.local().is_walking());
    Ok(())
}

#[tokio::test]
async fn keyboard_walk_onto_teleporter_switches_room() -> anyhow::Result<()> {
    init_tracing();
    let mut game = demo_game(NOWHERE, "alice")?;
    game.events().clear();
    assert_eq!(game.local().current_tile(), t(0, 0));

    for _ in 0..5 {
        tap(&mut game, "d").await;
    }
    assert_eq!(game.local().current_tile(), t(5, 0));
    tap(&mut game, "s").await;
    assert_eq!(game.local().current_tile(), t(5, 1));

    // Entering the teleporter freezes the avatar on the step itself.
    assert!(game.key_down("s"));
    game.key_up("s");
    assert!(frames_until(&mut game, Duration::from_secs(5), |g| g.local().is_frozen()).await);
    assert_eq!(game.local().current_tile(), t(5, 2));
    assert_eq!(game.world().current_room_index(), 0);

    assert!(frames_until(&mut game, Duration::from_secs(5), |g| !g.is_teleporting()).await);
    assert_eq!(game.world().current_room_index(), 1);
    assert_eq!(game.world().room_name(), "cellar");
    assert_eq!(game.local().current_tile(), t(2, 3));
    assert!(!game.local().is_frozen());

    let fades: Vec<Fade> = game.events().drain::<ScreenFade>().into_iter().map(|f| f.fade).collect();
    assert_eq!(fades, vec![Fade::Out, Fade::In]);
    let rooms = game.events().drain::<RoomChanged>();
    assert_eq!(rooms.last().map(|r| r.room_index), Some(1));
    Ok(())
}

#[tokio::test]
async fn mouse_walk_faces_last_step_direction() -> anyhow::Result<()> {
    init_tracing();
    let mut game = demo_game(NOWHERE, "alice")?;

    // Neighbours expand up, down, left, right, so the route is
    // (0, 1) -> (1, 1) -> (2, 1) and the last step faces right.
    let finder = PathFinder::new(game.world().bounds());
    let path = finder.find_path(t(0, 0), t(2, 1), game.world().blocked());
    assert_eq!(path, Some(vec![t(0, 1), t(1, 1), t(2, 1)]));

    assert!(game.click_tile(t(2, 1)));
    assert!(frames_until(&mut game, Duration::from_secs(5), |g| g.local().current_tile() == t(2, 1) && !g.local().is_walking()).await);
    assert_eq!(game.local().animation(), AnimationState::Idle(Direction::Right));
    Ok(())
}
