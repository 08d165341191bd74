//! Decoding of the engine's stats feed into [`StatsSample`] records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::session::{Session, next_from};
use super::{ClientChannel, RelayKind, ServerMessage};
use crate::docker::engine::Engine;

/// One decoded metrics point.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSample {
    pub read: Option<String>,
    pub cpu: CpuSample,
    pub memory: MemorySample,
    pub network: NetworkSample,
    #[serde(rename = "blockIO")]
    pub block_io: BlockIoSample,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuSample {
    /// Container CPU time consumed since the previous snapshot.
    pub usage: f64,
    /// Host CPU time elapsed since the previous snapshot.
    pub system_usage: f64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySample {
    pub usage: u64,
    pub limit: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetworkSample {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlockIoSample {
    pub read: u64,
    pub write: u64,
}

// Engine snapshot shape. Only the fields the sample needs; everything is
// optional because the first snapshot and cgroup v2 hosts omit parts of it.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStats {
    read: Option<String>,
    cpu_stats: RawCpuStats,
    precpu_stats: RawCpuStats,
    memory_stats: RawMemoryStats,
    networks: Option<HashMap<String, RawNetwork>>,
    blkio_stats: RawBlkioStats,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCpuStats {
    cpu_usage: RawCpuUsage,
    system_cpu_usage: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawCpuUsage {
    total_usage: Option<u64>,
    percpu_usage: Option<Vec<u64>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMemoryStats {
    usage: Option<u64>,
    limit: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawNetwork {
    rx_bytes: u64,
    tx_bytes: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBlkioStats {
    io_service_bytes_recursive: Option<Vec<RawBlkioEntry>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawBlkioEntry {
    op: String,
    value: u64,
}

/// Percentage of host CPU used between two snapshots, scaled by core count.
/// Zero whenever the host counter did not advance.
pub fn cpu_percent(cpu_delta: f64, system_delta: f64, cpu_count: usize) -> f64 {
    if system_delta > 0.0 {
        (cpu_delta / system_delta) * cpu_count as f64 * 100.0
    } else {
        0.0
    }
}

/// A zero limit is treated as 1.
pub fn memory_percent(usage: u64, limit: u64) -> f64 {
    let limit = if limit == 0 { 1 } else { limit };
    usage as f64 / limit as f64 * 100.0
}

/// Sum `Read` and `Write` entries; other operations are ignored.
pub fn block_io_totals<'a>(entries: impl IntoIterator<Item = (&'a str, u64)>) -> BlockIoSample {
    let mut totals = BlockIoSample { read: 0, write: 0 };
    for (op, value) in entries {
        match op {
            "Read" => totals.read += value,
            "Write" => totals.write += value,
            _ => {}
        }
    }
    totals
}

impl StatsSample {
    fn from_raw(raw: &RawStats) -> Self {
        let cur = &raw.cpu_stats;
        let pre = &raw.precpu_stats;

        let cpu_delta = cur.cpu_usage.total_usage.unwrap_or(0) as f64
            - pre.cpu_usage.total_usage.unwrap_or(0) as f64;
        // Without a previous host reading there is no interval to measure.
        let system_delta = match (cur.system_cpu_usage, pre.system_cpu_usage) {
            (Some(c), Some(p)) => c as f64 - p as f64,
            _ => 0.0,
        };
        let cpu_count = cur
            .cpu_usage
            .percpu_usage
            .as_ref()
            .map(Vec::len)
            .filter(|n| *n > 0)
            .unwrap_or(1);

        let mem_usage = raw.memory_stats.usage.unwrap_or(0);
        let mem_limit = raw.memory_stats.limit.filter(|l| *l > 0).unwrap_or(1);

        let (rx_bytes, tx_bytes) = raw
            .networks
            .iter()
            .flat_map(HashMap::values)
            .fold((0, 0), |(rx, tx), net| (rx + net.rx_bytes, tx + net.tx_bytes));

        let block_io = block_io_totals(
            raw.blkio_stats
                .io_service_bytes_recursive
                .iter()
                .flatten()
                .map(|e| (e.op.as_str(), e.value)),
        );

        Self {
            read: raw.read.clone(),
            cpu: CpuSample {
                usage: cpu_delta,
                system_usage: system_delta,
                percent: cpu_percent(cpu_delta, system_delta, cpu_count),
            },
            memory: MemorySample {
                usage: mem_usage,
                limit: mem_limit,
                percent: memory_percent(mem_usage, mem_limit),
            },
            network: NetworkSample { rx_bytes, tx_bytes },
            block_io,
        }
    }
}

/// Reassembles newline-delimited snapshots from arbitrarily split chunks.
#[derive(Debug, Default)]
pub struct StatsDecoder {
    pending: Vec<u8>,
}

impl StatsDecoder {
    /// Feed one chunk and return every sample completed by it. A trailing
    /// partial line is kept for the next chunk; lines that are not valid
    /// JSON are dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StatsSample> {
        self.pending.extend_from_slice(chunk);

        let mut samples = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            let line = &line[..end];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<RawStats>(line) {
                Ok(raw) => samples.push(StatsSample::from_raw(&raw)),
                Err(e) => tracing::trace!("Dropping undecodable stats line: {e}"),
            }
        }
        samples
    }
}

/// Forward one `stats` message per decoded snapshot until the client leaves.
/// Upstream failure is reported once and not retried.
pub async fn relay_stats<E: Engine + ?Sized>(engine: &E, container_id: &str, mut client: ClientChannel) {
    let mut session = Session::new(container_id, RelayKind::Stats);
    session.attach(engine.stream_stats(container_id));
    let mut decoder = StatsDecoder::default();

    'session: loop {
        tokio::select! {
            chunk = next_from(session.upstream()) => match chunk {
                Some(Ok(bytes)) => {
                    for data in decoder.push(&bytes) {
                        if client.send(ServerMessage::Stats { data }).await.is_err() {
                            break 'session;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(container_id, "Stats stream failed: {e}");
                    drop(session.release());
                    if client
                        .send(ServerMessage::Error { message: e.to_string() })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                None => {
                    tracing::debug!(container_id, "Stats stream ended");
                    drop(session.release());
                }
            },
            frame = client.recv() => {
                if frame.is_none() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::relay::testing::{FakeClient, FakeEngine, Script, Tail, upstream_error};

    fn snapshot(total: u64, pre_total: u64, system: u64, pre_system: u64) -> String {
        serde_json::json!({
            "read": "2024-05-01T10:00:00Z",
            "cpu_stats": {
                "cpu_usage": { "total_usage": total, "percpu_usage": [1, 2] },
                "system_cpu_usage": system
            },
            "precpu_stats": {
                "cpu_usage": { "total_usage": pre_total },
                "system_cpu_usage": pre_system
            },
            "memory_stats": { "usage": 256, "limit": 1024 },
            "networks": {
                "eth0": { "rx_bytes": 10, "tx_bytes": 20 },
                "eth1": { "rx_bytes": 5, "tx_bytes": 7 }
            },
            "blkio_stats": {
                "io_service_bytes_recursive": [
                    { "major": 8, "minor": 0, "op": "Read", "value": 100 },
                    { "major": 8, "minor": 0, "op": "Write", "value": 50 },
                    { "major": 8, "minor": 0, "op": "Sync", "value": 9999 }
                ]
            }
        })
        .to_string()
    }

    #[test]
    fn decodes_a_full_snapshot() {
        let mut decoder = StatsDecoder::default();
        let samples = decoder.push(format!("{}\n", snapshot(400, 200, 2000, 1000)).as_bytes());
        assert_eq!(samples.len(), 1);

        let sample = &samples[0];
        assert_eq!(sample.read.as_deref(), Some("2024-05-01T10:00:00Z"));
        assert_eq!(sample.cpu.usage, 200.0);
        assert_eq!(sample.cpu.system_usage, 1000.0);
        assert!((sample.cpu.percent - 40.0).abs() < 1e-9);
        assert_eq!(sample.memory.usage, 256);
        assert!((sample.memory.percent - 25.0).abs() < 1e-9);
        assert_eq!(sample.network, NetworkSample { rx_bytes: 15, tx_bytes: 27 });
        assert_eq!(sample.block_io, BlockIoSample { read: 100, write: 50 });
    }

    #[test]
    fn block_io_ignores_other_operations() {
        let totals = block_io_totals([("Read", 100), ("Write", 50), ("Sync", 9999)]);
        assert_eq!(totals, BlockIoSample { read: 100, write: 50 });

        let totals = block_io_totals([("read", 1), ("WRITE", 2), ("Async", 3)]);
        assert_eq!(totals, BlockIoSample { read: 0, write: 0 });
    }

    #[test]
    fn cpu_percent_is_zero_without_system_progress() {
        assert_eq!(cpu_percent(500.0, 0.0, 4), 0.0);
        assert_eq!(cpu_percent(500.0, -10.0, 4), 0.0);
        assert!(cpu_percent(0.0, 10.0, 4) >= 0.0);
    }

    #[test]
    fn cpu_percent_is_non_negative_for_monotonic_counters() {
        let readings: [(u64, u64); 4] = [(0, 0), (10, 100), (10, 250), (90, 400)];
        for pair in readings.windows(2) {
            let (pre_total, pre_system) = pair[0];
            let (total, system) = pair[1];
            let percent = cpu_percent(
                total as f64 - pre_total as f64,
                system as f64 - pre_system as f64,
                2,
            );
            assert!(percent >= 0.0);
        }
    }

    #[test]
    fn first_snapshot_reports_zero_cpu() {
        let line = r#"{"cpu_stats":{"cpu_usage":{"total_usage":5000},"system_cpu_usage":90000},"precpu_stats":{"cpu_usage":{"total_usage":0}}}"#;
        let samples = StatsDecoder::default().push(format!("{line}\n").as_bytes());
        assert_eq!(samples[0].cpu.percent, 0.0);
        assert_eq!(samples[0].cpu.system_usage, 0.0);
    }

    #[test]
    fn zero_memory_limit_is_treated_as_one() {
        assert_eq!(memory_percent(512, 0), 51200.0);

        let line = r#"{"memory_stats":{"usage":3,"limit":0}}"#;
        let samples = StatsDecoder::default().push(format!("{line}\n").as_bytes());
        assert_eq!(samples[0].memory.limit, 1);
        assert_eq!(samples[0].memory.percent, 300.0);
    }

    #[test]
    fn missing_per_core_usage_counts_one_cpu() {
        let line = r#"{"cpu_stats":{"cpu_usage":{"total_usage":50,"percpu_usage":[]},"system_cpu_usage":200},"precpu_stats":{"cpu_usage":{"total_usage":0},"system_cpu_usage":100}}"#;
        let samples = StatsDecoder::default().push(format!("{line}\n").as_bytes());
        assert!((samples[0].cpu.percent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn chunk_boundaries_do_not_change_the_samples() {
        let stream = format!(
            "{}\n{}\n",
            snapshot(400, 200, 2000, 1000),
            snapshot(900, 400, 4000, 2000)
        );
        let whole = StatsDecoder::default().push(stream.as_bytes());
        assert_eq!(whole.len(), 2);

        for split in 1..stream.len() {
            let mut decoder = StatsDecoder::default();
            let mut samples = decoder.push(&stream.as_bytes()[..split]);
            samples.extend(decoder.push(&stream.as_bytes()[split..]));
            assert_eq!(samples, whole, "split at {split}");
        }
    }

    #[test]
    fn undecodable_lines_are_skipped() {
        let stream = format!("{{broken\n\n{}\n", snapshot(2, 1, 20, 10));
        let samples = StatsDecoder::default().push(stream.as_bytes());
        assert_eq!(samples.len(), 1);
    }

    #[tokio::test]
    async fn relays_one_message_per_sample_across_chunks() {
        let engine = Arc::new(FakeEngine::default());
        let line = format!("{}\n", snapshot(400, 200, 2000, 1000));
        let (head, tail) = line.split_at(17);
        engine.push_stats(Script::ok(
            vec![
                Bytes::from(head.to_string()),
                Bytes::from(format!("{tail}{line}")),
            ],
            Tail::Hang,
        ));
        let (mut client, channel) = FakeClient::new();
        let relay = {
            let engine = engine.clone();
            tokio::spawn(async move { relay_stats(engine.as_ref(), "db", channel).await })
        };

        for _ in 0..2 {
            match client.next().await {
                ServerMessage::Stats { data } => assert_eq!(data.block_io.read, 100),
                other => panic!("unexpected {other:?}"),
            }
        }
        client.assert_quiet().await;

        drop(client);
        relay.await.unwrap();
        assert_eq!(engine.stats_released(), 1);
    }

    #[tokio::test]
    async fn upstream_failure_is_reported_once_and_not_retried() {
        let engine = Arc::new(FakeEngine::default());
        engine.push_stats(Script::new(vec![Err(upstream_error("daemon went away"))], Tail::Hang));
        let (mut client, channel) = FakeClient::new();
        let relay = {
            let engine = engine.clone();
            tokio::spawn(async move { relay_stats(engine.as_ref(), "db", channel).await })
        };

        assert_eq!(
            client.next().await,
            ServerMessage::Error { message: "daemon went away".into() }
        );
        client.assert_quiet().await;
        assert_eq!(engine.stats_released(), 1);

        drop(client);
        relay.await.unwrap();
        assert_eq!(engine.stats_released(), 1);
    }
}
