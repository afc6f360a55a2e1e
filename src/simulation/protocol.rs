//! Flood-with-acknowledgement state machine.
//!
//! Invoked by the wavefront engine once a wave has passed the reception test
//! at a node. The handlers update dedup sets and statistics, publish events,
//! and return at most one [`Relay`] describing the wave the node transmits in
//! response. The engine emits relays after the current tick has finished
//! processing, so a relay is first advanced on the following tick.

use super::statistics::Statistics;
use super::types::{Node, NodeKind, Payload, ProtocolKey, SimulationEvent, WaveKind};
use super::wave::Wave;
use std::collections::HashMap;

/// Wave a node emits in reaction to a reception.
#[derive(Debug, Clone, PartialEq)]
pub struct Relay {
    pub emitter_id: String,
    pub kind: WaveKind,
    pub payload: Payload,
    pub ttl: i32,
}

/// Shared state the handlers mutate.
pub struct ProtocolContext<'a> {
    pub statistics: &'a mut Statistics,
    /// First DATA emission time per message, consumed by the origin's ACK.
    pub first_emission: &'a mut HashMap<ProtocolKey, f64>,
    pub events: &'a mut Vec<SimulationEvent>,
    pub now_ms: f64,
}

/// Dispatch a successful reception of `wave` at `node`.
pub fn handle_reception(node: &mut Node, wave: &Wave, ctx: &mut ProtocolContext<'_>) -> Option<Relay> {
    match (node.kind, wave.kind) {
        (NodeKind::Server, WaveKind::Data) => server_receives_data(node, wave, ctx),
        (NodeKind::Server, WaveKind::Ack) => None,
        (NodeKind::Hive { .. }, WaveKind::Data) => hive_receives_data(node, wave, ctx),
        (NodeKind::Hive { .. }, WaveKind::Ack) => hive_receives_ack(node, wave, ctx),
    }
}

fn server_receives_data(server: &mut Node, wave: &Wave, ctx: &mut ProtocolContext<'_>) -> Option<Relay> {
    let key = wave.key();
    if !server.seen_data.insert(key.clone()) {
        ctx.statistics.dup_ignored += 1;
        ctx.events.push(SimulationEvent::DuplicateIgnored { node: server.id.clone(), key });
        return None;
    }

    ctx.statistics.data_delivered += 1;
    let hops = wave.payload.hops;
    log::info!("{} received DATA {} after {} hop(s)", server.id, key, hops);
    ctx.events.push(SimulationEvent::DeliveredToServer { key, hops });

    Some(Relay {
        emitter_id: server.id.clone(),
        kind: WaveKind::Ack,
        payload: wave.payload.clone(),
        ttl: (hops.min(i32::MAX as u32) as i32).max(1),
    })
}

fn hive_receives_data(hive: &mut Node, wave: &Wave, ctx: &mut ProtocolContext<'_>) -> Option<Relay> {
    // The origin ignores echoes of its own message
    if hive.id == wave.payload.origin {
        return None;
    }

    let key = wave.key();
    if !hive.seen_data.insert(key.clone()) {
        ctx.statistics.dup_ignored += 1;
        ctx.events.push(SimulationEvent::DuplicateIgnored { node: hive.id.clone(), key });
        return None;
    }

    if wave.ttl <= 0 {
        ctx.statistics.ttl_drops += 1;
        log::debug!("{} dropped DATA {}: TTL exhausted", hive.id, key);
        ctx.events.push(SimulationEvent::TtlDrop { node: hive.id.clone(), key });
        return None;
    }

    ctx.statistics.relays_data += 1;
    let ttl = wave.ttl - 1;
    ctx.events.push(SimulationEvent::Relayed {
        node: hive.id.clone(),
        kind: WaveKind::Data,
        key,
        ttl,
    });
    let mut payload = wave.payload.clone();
    payload.hops = payload.hops.saturating_add(1);
    Some(Relay {
        emitter_id: hive.id.clone(),
        kind: WaveKind::Data,
        payload,
        ttl,
    })
}

fn hive_receives_ack(hive: &mut Node, wave: &Wave, ctx: &mut ProtocolContext<'_>) -> Option<Relay> {
    let key = wave.key();

    if hive.id == wave.payload.origin {
        if !hive.seen_ack.insert(key.clone()) {
            return None;
        }
        let latency_ms = ctx.first_emission.remove(&key).map(|t0| ctx.now_ms - t0);
        if let Some(latency) = latency_ms {
            ctx.statistics.latency_sum_ms += latency;
        }
        let hops = wave.payload.hops;
        ctx.statistics.deliveries += 1;
        ctx.statistics.total_hops += hops as u64;
        ctx.statistics.origin_acked += 1;
        log::info!("{} received its ACK for {}", hive.id, key);
        ctx.events.push(SimulationEvent::OriginAcknowledged {
            node: hive.id.clone(),
            key,
            hops,
            latency_ms,
        });
        return None;
    }

    // Duplicate ACKs are suppressed silently, unlike duplicate DATA
    if wave.ttl <= 0 || !hive.seen_ack.insert(key.clone()) {
        return None;
    }

    ctx.statistics.relays_ack += 1;
    let ttl = wave.ttl - 1;
    ctx.events.push(SimulationEvent::Relayed {
        node: hive.id.clone(),
        kind: WaveKind::Ack,
        key,
        ttl,
    });
    Some(Relay {
        emitter_id: hive.id.clone(),
        kind: WaveKind::Ack,
        payload: wave.payload.clone(),
        ttl,
    })
}
