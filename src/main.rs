use std::sync::Arc;
use std::time::Duration;

use clap::{Arg, Command};
use glam::Vec2;
use log::{info, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::sync::mpsc;

use party_tracker::scene::{Item, ItemStore, MemoryScene};
use party_tracker::{KeyEvent, MembershipReconciler, PartyMember, PartyRegistry, PartyTracker};

const SCENE_DPI: f32 = 150.0;

fn cell_center(column: f32, row: f32) -> Vec2 {
    Vec2::new((column + 0.5) * SCENE_DPI, (row + 0.5) * SCENE_DPI)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let matches = Command::new("party-tracker")
        .about("Party roster and active-token overlay demo")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let scene = MemoryScene::new(SCENE_DPI);
    scene.set_ready(true);
    scene
        .items()
        .add_items(vec![
            Item::token("ada", "Ada", cell_center(2.0, 2.0), Vec2::splat(SCENE_DPI), SCENE_DPI),
            Item::token("brin", "Brin", cell_center(4.0, 2.0), Vec2::splat(SCENE_DPI), SCENE_DPI),
            Item::token("cass", "Cass", cell_center(3.0, 4.0), Vec2::splat(SCENE_DPI), SCENE_DPI),
        ])
        .await?;

    let (key_tx, key_rx) = mpsc::unbounded_channel();
    let tracker = PartyTracker::new(scene.handles());
    let tracker_task = tokio::spawn(tracker.run(key_rx));

    let registry = PartyRegistry::new(Arc::new(scene.clone()));
    let reconciler = MembershipReconciler::new(
        registry.clone(),
        Arc::new(scene.items()),
        Arc::new(scene.clone()),
    );
    for (id, name) in [("ada", "Ada"), ("brin", "Brin"), ("cass", "Cass")] {
        reconciler.add_to_party(PartyMember::new(id, name)).await?;
    }

    // Cycle to the first member, walk it around, then hand off to the next.
    for key in ["]", "Numpad6", "Numpad2", "]", "Numpad4"] {
        key_tx.send(KeyEvent::press(key))?;
        tokio::time::sleep(Duration::from_millis(400)).await;
    }

    let state = registry.get().await?;
    info!(
        "roster: [{}], active: {}",
        state
            .members
            .iter()
            .map(|member| member.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        state
            .active_id
            .as_ref()
            .map(|id| id.as_str())
            .unwrap_or("none")
    );
    for item in scene.items().get_items().await? {
        info!("{} at ({}, {})", item.name, item.position.x, item.position.y);
    }

    // Scene teardown: the overlay and its pulse must not survive this.
    scene.set_ready(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    info!(
        "overlay items after scene close: {}",
        scene.local_items().get_items().await?.len()
    );

    drop(key_tx);
    tracker_task.await?;
    Ok(())
}
