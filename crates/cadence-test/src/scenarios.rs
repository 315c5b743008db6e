//! End-to-end channel scenarios over the simulated network

use std::sync::Arc;

use parking_lot::Mutex;

use cadence_core::{tuple, CadenceError, CollectionKind, Schema, Tuple};
use cadence_runtime::{Collection, Program, Rule, RuntimeConfig};

use crate::filters::{batch_at_least, keep_only};
use crate::harness::{Cluster, DEFAULT_MAX_ROUNDS};
use crate::network::{ChaosConfig, SimulatedNetwork};

/// Record every callback invocation on `collection` of member `i`.
fn observe(cluster: &mut Cluster, i: usize, collection: &str) -> Arc<Mutex<Vec<Vec<Tuple>>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    cluster
        .engine_mut(i)
        .register_callback(collection, move |c: &Collection| {
            let mut tuples = c.to_vec();
            tuples.sort();
            sink.lock().push(tuples);
        })
        .unwrap();
    seen
}

// ============================================================================
// RING
// ============================================================================

const RING_SIZE: usize = 10;

fn ring_member() -> Program {
    let mut b = Program::builder();
    b.channel("pipe", Schema::keys(["@addr", "cnt"])).unwrap();
    b.scratch("kickoff", Schema::keys(["cnt"])).unwrap();
    b.table("next_guy", Schema::keys(["addr"])).unwrap();
    b.table("last_cnt", Schema::keys(["cnt"])).unwrap();
    b.scratch("done", Schema::keys(["cnt"])).unwrap();

    b.rule(Rule::send("pipe").from("kickoff").body(|s| {
        s.get("kickoff")
            .iter()
            .map(|k| tuple![s.local_addr(), k[0].clone()])
            .collect()
    }))
    .unwrap();
    b.rule(
        Rule::send("pipe")
            .from("pipe")
            .from("next_guy")
            .body(|s| {
                s.get("pipe")
                    .pairs(&s.get("next_guy"))
                    .into_iter()
                    .filter_map(|(p, n)| {
                        let cnt = p.int(1)?;
                        (cnt < 39).then(|| tuple![n[0].clone(), cnt + 1])
                    })
                    .collect()
            }),
    )
    .unwrap();
    b.rule(
        Rule::derive("done")
            .from("pipe")
            .each(|p| p.int(1).filter(|c| *c == 39).map(|c| tuple![c])),
    )
    .unwrap();
    b.rule(
        Rule::insert("last_cnt")
            .from("pipe")
            .each(|p| p.int(1).map(|c| tuple![c])),
    )
    .unwrap();
    b.rule(
        Rule::delete("last_cnt")
            .from("pipe")
            .from_nonmonotone("last_cnt")
            .body(|s| {
                if s.get("pipe").is_empty() {
                    Vec::new()
                } else {
                    s.get("last_cnt").to_vec()
                }
            }),
    )
    .unwrap();
    b.build().unwrap()
}

fn build_ring(network: SimulatedNetwork) -> Cluster {
    let mut cluster = Cluster::new(network);
    for _ in 0..RING_SIZE {
        cluster.spawn(ring_member());
    }
    for i in 0..RING_SIZE {
        let next = cluster.addr((i + 1) % RING_SIZE);
        cluster
            .engine_mut(i)
            .insert_next("next_guy", tuple![next])
            .unwrap();
    }
    cluster.tick_all().unwrap();
    cluster
}

fn assert_ring_settled(cluster: &Cluster) {
    for i in 0..RING_SIZE {
        assert_eq!(
            cluster.current(i, "last_cnt").unwrap(),
            vec![tuple![30 + i as i64]],
            "member {}",
            i
        );
    }
}

#[test]
fn test_ring_forwards_counter() {
    let mut cluster = build_ring(SimulatedNetwork::new());
    let done = observe(&mut cluster, RING_SIZE - 1, "done");

    cluster.engine_mut(0).insert_next("kickoff", tuple![0]).unwrap();
    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();

    assert_eq!(*done.lock(), vec![vec![tuple![39]]]);
    assert_ring_settled(&cluster);
    // Member 0 kicks off by sending to itself
    assert_eq!(cluster.engine(0).channel_stats().frames_local, 1);
}

#[test]
fn test_ring_tolerates_duplicate_frames() {
    let network = SimulatedNetwork::with_chaos(
        ChaosConfig {
            duplicate_prob: 1.0,
            ..ChaosConfig::perfect()
        },
        3,
    );
    let mut cluster = build_ring(network);
    cluster.engine_mut(0).insert_next("kickoff", tuple![0]).unwrap();
    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();

    assert_ring_settled(&cluster);
    let stats = cluster.network().stats();
    assert!(stats.frames_duplicated > 0);
    assert_eq!(stats.frames_duplicated, stats.frames_sent);
}

// ============================================================================
// LOOPBACK
// ============================================================================

#[test]
fn test_loopback_counts_to_61_once() {
    let mut b = Program::builder();
    b.declare_default("me", CollectionKind::Loopback).unwrap();
    b.declare_default("done", CollectionKind::Scratch).unwrap();
    b.rule(Rule::send("me").bootstrap().facts(vec![tuple!["foo", 1]]))
        .unwrap();
    b.rule(Rule::send("me").from("me").each(|t| {
        let val = t.int(1)?;
        (val <= 60).then(|| tuple![t[0].clone(), val + 1])
    }))
    .unwrap();
    b.rule(
        Rule::derive("done")
            .from("me")
            .each(|t| t.int(1).filter(|v| *v > 60).map(|_| t.clone())),
    )
    .unwrap();

    let mut cluster = Cluster::default();
    let me = cluster.spawn(b.build().unwrap());
    let done = observe(&mut cluster, me, "done");

    cluster.tick(me).unwrap();
    assert!(cluster.engine(me).current("me").unwrap().is_empty());
    cluster.tick(me).unwrap();
    assert_eq!(cluster.engine(me).collection("me").unwrap().len(), 0);

    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();
    assert_eq!(*done.lock(), vec![vec![tuple!["foo", 61]]]);
    // Loopback traffic never reaches the network
    assert_eq!(cluster.network().stats().frames_sent, 0);
}

// ============================================================================
// FILTERS
// ============================================================================

fn simple_agent() -> Program {
    let mut b = Program::builder();
    b.channel("chn", Schema::keys(["@addr", "val"])).unwrap();
    b.scratch("input_t", Schema::keys(["addr", "val"])).unwrap();
    b.table("log", Schema::keys(["addr", "val"])).unwrap();
    b.rule(Rule::send("chn").from("input_t").body(|s| s.get("input_t").to_vec()))
        .unwrap();
    b.rule(Rule::derive("log").from("chn").body(|s| s.get("chn").to_vec()))
        .unwrap();
    b.build().unwrap()
}

#[test]
fn test_filter_releases_batch_of_twelve() {
    let mut cluster = Cluster::default();
    let src = cluster.spawn_with(
        simple_agent(),
        RuntimeConfig::default(),
        Some(batch_at_least("chn", 12)),
    );
    let dst = cluster.spawn(simple_agent());
    let batches = observe(&mut cluster, dst, "chn");
    let to = cluster.addr(dst);

    for i in 0..12 {
        cluster
            .engine_mut(src)
            .insert_next("input_t", tuple![to.as_str(), i])
            .unwrap();
        cluster.tick(src).unwrap();
        cluster.tick(dst).unwrap();
    }

    let batches = batches.lock();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 12);
    assert_eq!(cluster.current(dst, "log").unwrap().len(), 12);
}

#[test]
fn test_filter_drops_permanently() {
    let mut cluster = Cluster::default();
    let src = cluster.spawn_with(
        simple_agent(),
        RuntimeConfig::default(),
        Some(keep_only("chn", |t| t.int(1) == Some(3))),
    );
    let dst = cluster.spawn(simple_agent());
    let to = cluster.addr(dst);

    for i in 0..=25 {
        cluster
            .engine_mut(src)
            .insert_next("input_t", tuple![to.as_str(), i])
            .unwrap();
        cluster.tick(src).unwrap();
    }
    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();

    assert_eq!(cluster.current(dst, "log").unwrap(), vec![tuple![to.as_str(), 3]]);
}

// ============================================================================
// DISCONNECT
// ============================================================================

fn channel_usage() -> Program {
    let mut b = Program::builder();
    b.table("node", Schema::keys(["addr"])).unwrap();
    b.scratch("msg_buf", Schema::keys(["v"])).unwrap();
    b.channel("chn", Schema::keys(["@addr", "v"])).unwrap();
    b.table("rbuf", Schema::keys(["v"])).unwrap();
    b.rule(
        Rule::send("chn")
            .from("node")
            .from("msg_buf")
            .body(|s| {
                s.get("node")
                    .pairs(&s.get("msg_buf"))
                    .into_iter()
                    .map(|(n, m)| tuple![n[0].clone(), m[0].clone()])
                    .collect()
            }),
    )
    .unwrap();
    b.rule(Rule::derive("rbuf").from("chn").body(|s| s.get("chn").payloads()))
        .unwrap();
    b.build().unwrap()
}

fn send_three(cluster: &mut Cluster, member: usize, offset: usize) {
    for i in 0..3 {
        cluster
            .engine_mut(member)
            .insert_next("msg_buf", tuple![format!("foo{}", i + offset)])
            .unwrap();
        cluster.tick(member).unwrap();
    }
}

#[test]
fn test_disconnect_drops_and_reconnect_resumes() {
    let mut cluster = Cluster::default();
    let first = cluster.spawn(channel_usage());
    let last = cluster.spawn(channel_usage());
    let (first_addr, last_addr) = (cluster.addr(first), cluster.addr(last));
    cluster.engine_mut(first).insert_next("node", tuple![last_addr]).unwrap();
    cluster.engine_mut(last).insert_next("node", tuple![first_addr]).unwrap();
    cluster.tick_all().unwrap();

    send_three(&mut cluster, first, 0);
    cluster.engine_mut(first).disconnect_all();
    send_three(&mut cluster, first, 10);
    cluster.engine_mut(first).connect_all();
    send_three(&mut cluster, first, 20);
    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();

    let expected: Vec<Tuple> = ["foo0", "foo1", "foo2", "foo20", "foo21", "foo22"]
        .into_iter()
        .map(|v| tuple![v])
        .collect();
    assert_eq!(cluster.current(last, "rbuf").unwrap(), expected);
    assert_eq!(cluster.engine(first).channel_stats().dropped_disconnected, 3);
}

#[test]
fn test_disconnect_single_peer() {
    let mut cluster = Cluster::default();
    let first = cluster.spawn(channel_usage());
    let last = cluster.spawn(channel_usage());
    let last_addr = cluster.addr(last);
    cluster.engine_mut(first).insert_next("node", tuple![last_addr.as_str()]).unwrap();
    cluster.tick_all().unwrap();

    cluster.engine_mut(first).disconnect(&last_addr);
    send_three(&mut cluster, first, 0);
    cluster.engine_mut(first).connect(&last_addr);
    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();

    // Nothing was queued while disconnected
    assert!(cluster.current(last, "rbuf").unwrap().is_empty());
    send_three(&mut cluster, first, 5);
    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();
    assert_eq!(cluster.current(last, "rbuf").unwrap().len(), 3);
}

// ============================================================================
// SOURCE ADDRESS
// ============================================================================

fn ping_pong() -> Program {
    let mut b = Program::builder();
    b.channel("chn", Schema::keys(["@addr", "msg_id"])).unwrap();
    b.scratch("in_t", Schema::keys(["addr", "msg_id"])).unwrap();
    b.table("log", Schema::keys(["addr", "msg_id"])).unwrap();
    b.table("done", Schema::keys(["addr", "msg_id"])).unwrap();
    b.rule(Rule::send("chn").from("in_t").body(|s| s.get("in_t").to_vec()))
        .unwrap();
    b.rule(Rule::send("chn").from("chn").each(|c| {
        let from = c.source_addr()?;
        let id = c.int(1)?;
        (id < 10).then(|| tuple![from, id + 1])
    }))
    .unwrap();
    b.rule(Rule::derive("log").from("chn").body(|s| s.get("chn").to_vec()))
        .unwrap();
    b.rule(
        Rule::derive("done")
            .from("chn")
            .each(|c| c.int(1).filter(|id| *id >= 10).map(|_| c.clone())),
    )
    .unwrap();
    b.build().unwrap()
}

#[test]
fn test_reply_to_source_address() {
    let mut cluster = Cluster::default();
    let u1 = cluster.spawn(ping_pong());
    let u2 = cluster.spawn(ping_pong());
    let (a1, a2) = (cluster.addr(u1), cluster.addr(u2));

    cluster
        .engine_mut(u1)
        .insert_next("in_t", tuple![a2.as_str(), 0])
        .unwrap();
    cluster.tick(u1).unwrap();
    // Not visible at the receiver during the sending tick
    assert!(cluster.current(u2, "log").unwrap().is_empty());

    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();

    let log = |addr: &str, ids: &[i64]| -> Vec<Tuple> {
        ids.iter().map(|&id| tuple![addr, id]).collect()
    };
    assert_eq!(cluster.current(u1, "log").unwrap(), log(a1.as_str(), &[1, 3, 5, 7, 9]));
    assert_eq!(
        cluster.current(u2, "log").unwrap(),
        log(a2.as_str(), &[0, 2, 4, 6, 8, 10])
    );
    assert_eq!(cluster.current(u2, "done").unwrap(), log(a2.as_str(), &[10]));
}

// ============================================================================
// PAYLOADS AND KEYS
// ============================================================================

fn channel_with_key() -> Program {
    let mut b = Program::builder();
    b.channel("c", Schema::new(["@addr", "k1"], ["v1"])).unwrap();
    b.scratch("kickoff", Schema::keys(["addr", "v1", "v2"])).unwrap();
    b.table("recv", Schema::new(["addr", "k1"], ["v1"])).unwrap();
    b.declare_default("ploads", CollectionKind::Table).unwrap();
    b.declare_default("ploads_blk", CollectionKind::Table).unwrap();
    b.rule(Rule::send("c").from("kickoff").body(|s| s.get("kickoff").to_vec()))
        .unwrap();
    b.rule(Rule::derive("recv").from("c").body(|s| s.get("c").to_vec()))
        .unwrap();
    b.rule(Rule::derive("ploads").from("c").body(|s| s.get("c").payloads()))
        .unwrap();
    b.rule(Rule::derive("ploads_blk").from("c").body(|s| {
        s.get("c")
            .payloads()
            .iter()
            .filter_map(|m| Some(tuple![m.int(0)? + 1, m.int(1)? + 1]))
            .collect()
    }))
    .unwrap();
    b.build().unwrap()
}

#[test]
fn test_channel_with_key_payloads() {
    let mut cluster = Cluster::default();
    let p1 = cluster.spawn(channel_with_key());
    let p2 = cluster.spawn(channel_with_key());
    let to = cluster.addr(p2);
    let to = to.as_str();

    let engine = cluster.engine_mut(p1);
    engine.insert_next("kickoff", tuple![to, 10, 20]).unwrap();
    engine.send("c", tuple![to, 50, 100]).unwrap();
    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();

    assert_eq!(
        cluster.current(p2, "recv").unwrap(),
        vec![tuple![to, 10, 20], tuple![to, 50, 100]]
    );
    assert_eq!(
        cluster.current(p2, "ploads").unwrap(),
        vec![tuple![10, 20], tuple![50, 100]]
    );
    assert_eq!(
        cluster.current(p2, "ploads_blk").unwrap(),
        vec![tuple![11, 21], tuple![51, 101]]
    );
}

#[test]
fn test_channel_key_constraint_on_sends() {
    let mut cluster = Cluster::default();
    let p1 = cluster.spawn(channel_with_key());
    let p2 = cluster.spawn(channel_with_key());
    let to = cluster.addr(p2);

    let engine = cluster.engine_mut(p1);
    engine.send("c", tuple![to.as_str(), 70, 120]).unwrap();
    engine.send("c", tuple![to.as_str(), 70, 130]).unwrap();
    assert!(matches!(
        cluster.tick(p1),
        Err(CadenceError::KeyConstraintError { .. })
    ));
    assert_eq!(cluster.network().stats().frames_sent, 0);

    // Neither tuple survives the aborted tick
    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();
    assert!(cluster.current(p2, "recv").unwrap().is_empty());
}

#[test]
fn test_derive_into_channel_rejected() {
    let mut b = Program::builder();
    b.channel("c", Schema::new(["@addr", "k1"], ["v1"])).unwrap();
    b.scratch("s", Schema::keys(["addr", "k1", "v1"])).unwrap();
    assert!(matches!(
        b.rule(Rule::derive("c").from("s").body(|s| s.get("s").to_vec())),
        Err(CadenceError::InvalidOperator { .. })
    ));
}

#[test]
fn test_address_in_value_column() {
    let program = || {
        let mut b = Program::builder();
        b.channel("c", Schema::new(["k1"], ["@addr", "v1"])).unwrap();
        b.scratch("kickoff", Schema::keys(["v1", "addr", "v2"])).unwrap();
        b.table("recv", Schema::new(["k1"], ["addr", "v1"])).unwrap();
        b.rule(Rule::send("c").from("kickoff").body(|s| s.get("kickoff").to_vec()))
            .unwrap();
        b.rule(Rule::derive("recv").from("c").body(|s| s.get("c").to_vec()))
            .unwrap();
        b.build().unwrap()
    };

    let mut cluster = Cluster::default();
    let p1 = cluster.spawn(program());
    let p2 = cluster.spawn(program());
    let to = cluster.addr(p2);
    let to = to.as_str();

    let engine = cluster.engine_mut(p1);
    engine.insert_next("kickoff", tuple![10, to, 20]).unwrap();
    engine.send("c", tuple![50, to, 100]).unwrap();
    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();

    assert_eq!(
        cluster.current(p2, "recv").unwrap(),
        vec![tuple![10, to, 20], tuple![50, to, 100]]
    );
}

// ============================================================================
// BOOTSTRAP AND DECLARATIONS
// ============================================================================

#[test]
fn test_bootstrap_seeds_tables_and_loopback() {
    let mut b = Program::builder();
    b.loopback("loop_chan", Schema::keys(["foo"])).unwrap();
    b.table("t1", Schema::keys(["addr"])).unwrap();
    b.table("t2", Schema::keys(["foo"])).unwrap();
    b.rule(Rule::send("loop_chan").bootstrap().facts(vec![tuple![1000]]))
        .unwrap();
    b.rule(
        Rule::derive("t1")
            .bootstrap()
            .body(|s| vec![tuple![s.local_addr()]]),
    )
    .unwrap();
    b.rule(Rule::derive("t2").from("loop_chan").body(|s| s.get("loop_chan").to_vec()))
        .unwrap();

    let mut cluster = Cluster::default();
    let c = cluster.spawn(b.build().unwrap());
    let arrivals = observe(&mut cluster, c, "loop_chan");

    cluster.tick(c).unwrap();
    assert_eq!(cluster.current(c, "t1").unwrap(), vec![tuple![cluster.addr(c)]]);
    assert!(cluster.current(c, "t2").unwrap().is_empty());

    cluster.run_until_quiet(DEFAULT_MAX_ROUNDS).unwrap();
    assert_eq!(cluster.current(c, "t2").unwrap(), vec![tuple![1000]]);
    assert_eq!(*arrivals.lock(), vec![vec![tuple![1000]]]);
}

#[test]
fn test_channel_address_declarations() {
    let mut b = Program::builder();
    assert!(matches!(
        b.channel("c", Schema::keys(["foo", "bar"])),
        Err(CadenceError::SchemaError { .. })
    ));
    assert!(matches!(
        b.channel("d", Schema::new(["@foo"], ["bar", "@baz"])),
        Err(CadenceError::SchemaError { .. })
    ));
    assert!(!b.is_declared("c"));
}
