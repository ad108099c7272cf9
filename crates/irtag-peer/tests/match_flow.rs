use std::future::Future;
use std::time::Duration;

use irtag_authority::config::{AuthorityConfig, TimingConfig};
use irtag_authority::node::{self as authority_node, AuthorityHandle};
use irtag_core::match_state::MirrorPhase;
use irtag_core::weapon::FireRejection;
use irtag_peer::config::{IdentityConfig, PeerConfig, PeerTimingConfig};
use irtag_peer::node::{self as peer_node, PeerHandle};

async fn authority() -> AuthorityHandle {
    let config = AuthorityConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        discovery_targets: Vec::new(),
        auto_export: false,
        timing: TimingConfig {
            heartbeat_interval_ms: 200,
            tick_interval_ms: 20,
            ..TimingConfig::default()
        },
        ..AuthorityConfig::default()
    };
    authority_node::spawn(config).await.unwrap()
}

async fn robot(id: u8, authority: &AuthorityHandle) -> PeerHandle {
    let config = PeerConfig {
        identity: IdentityConfig {
            id,
            name: format!("Team {id}"),
            robot_name: format!("Robot {id}"),
        },
        authority_addr: authority.local_addr.to_string(),
        listen_addr: Some("127.0.0.1:0".to_string()),
        timing: PeerTimingConfig {
            heartbeat_interval_ms: 200,
            poll_interval_ms: 20,
            ..PeerTimingConfig::default()
        },
        ..PeerConfig::default()
    };
    peer_node::spawn(config).await.unwrap()
}

/// Poll `check` until it holds (5s timeout).
async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("Condition not reached in time");
}

async fn all_online(auth: &AuthorityHandle, count: usize) {
    eventually(|| async move {
        let status = auth.status().await.unwrap();
        status.snapshot.participants.iter().filter(|p| p.online).count() == count
    })
    .await;
}

#[tokio::test]
async fn robots_register_on_their_own() {
    let auth = authority().await;
    let one = robot(1, &auth).await;
    let two = robot(2, &auth).await;

    all_online(&auth, 2).await;
    for robot in [&one, &two] {
        eventually(|| async move { robot.status().await.unwrap().peer.registered }).await;
    }

    one.shutdown().await;
    two.shutdown().await;
    auth.shutdown().await;
}

#[tokio::test]
async fn tag_scores_for_the_shooter() {
    let auth = authority().await;
    let red = robot(1, &auth).await;
    let blue = robot(2, &auth).await;
    all_online(&auth, 2).await;

    auth.start_match(vec![1, 2], Some(60_000))
        .await
        .unwrap()
        .unwrap();
    for robot in [&red, &blue] {
        eventually(|| async move {
            robot.status().await.unwrap().peer.phase == MirrorPhase::Active
        })
        .await;
    }

    let bursts = red.fire().await.unwrap().unwrap();
    assert!(matches!(
        red.fire().await.unwrap(),
        Err(FireRejection::CoolingDown { .. })
    ));

    assert!(blue.receive_frame(bursts).await.unwrap());
    assert!(blue.check_move().await.unwrap().is_err());

    let (r, b) = (&red, &blue);
    eventually(|| async move { r.status().await.unwrap().peer.score.total == 100 }).await;
    eventually(|| async move { b.status().await.unwrap().peer.score.deaths == 1 }).await;

    red.shutdown().await;
    blue.shutdown().await;
    auth.shutdown().await;
}

#[tokio::test]
async fn burst_by_burst_reception_scores() {
    let auth = authority().await;
    let red = robot(1, &auth).await;
    let blue = robot(2, &auth).await;
    all_online(&auth, 2).await;

    auth.start_match(vec![1, 2], Some(60_000))
        .await
        .unwrap()
        .unwrap();
    for robot in [&red, &blue] {
        eventually(|| async move {
            robot.status().await.unwrap().peer.phase == MirrorPhase::Active
        })
        .await;
    }

    for duration_us in red.fire().await.unwrap().unwrap() {
        blue.receive_burst(duration_us).unwrap();
    }

    let (r, b) = (&red, &blue);
    eventually(|| async move { r.status().await.unwrap().peer.score.kills == 1 }).await;
    eventually(|| async move { b.status().await.unwrap().peer.weapon.disabled }).await;
    assert_eq!(blue.status().await.unwrap().peer.rejected_frames, 0);

    red.shutdown().await;
    blue.shutdown().await;
    auth.shutdown().await;
}

#[tokio::test]
async fn robot_finds_authority_through_discovery() {
    // Nothing listens on the configured authority address.
    let placeholder = authority().await;
    let lost = placeholder.local_addr;
    placeholder.shutdown().await;

    let config = PeerConfig {
        identity: IdentityConfig {
            id: 3,
            ..IdentityConfig::default()
        },
        authority_addr: lost.to_string(),
        listen_addr: Some("127.0.0.1:0".to_string()),
        ..PeerConfig::default()
    };
    let robot = peer_node::spawn(config).await.unwrap();

    let auth = authority_node::spawn(AuthorityConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        discovery_targets: vec![robot.local_addr.to_string()],
        auto_export: false,
        timing: TimingConfig {
            discovery_interval_ms: 50,
            ..TimingConfig::default()
        },
        ..AuthorityConfig::default()
    })
    .await
    .unwrap();

    let (r, expected) = (&robot, auth.local_addr);
    eventually(|| async move { r.status().await.unwrap().authority == expected }).await;
    all_online(&auth, 1).await;

    robot.shutdown().await;
    auth.shutdown().await;
}
