//! Prompt templates sent to the reasoning service.

use crate::types::SystemMetricsSnapshot;

/// Cache-controller prompt for one metrics bucket.
///
/// The answer must be a single JSON object with `ttl_seconds`,
/// `admission_threshold`, `eviction_priority` and a short `reasoning`.
pub fn policy_prompt(metrics: &SystemMetricsSnapshot) -> String {
    format!(
        r#"You are an autonomous controller for a vector database cache.
Your goal is to optimize for the following priorities:
1. Stability: Keep P99 latency under 50ms.
2. Efficiency: Maximize cache hit rate to reduce expensive vector search computations.
3. Resource Management: Prevent CPU saturation (target < 80% utilization).

System Metrics:
- Current QPS: {qps}
- Current Cache Miss Rate: {miss_rate}
- P99 Latency: {latency}ms
- CPU Utilization: {cpu}%
- GPU Utilization: {gpu}%

Task:
Determine the optimal cache configuration to balance these goals based on the provided metrics.
If resources are tight, sacrifice some cache efficiency to maintain stability.
If latency is low and resources are available, try to increase TTL to improve future hit rates.
If miss rate is high, consider whether increasing TTL or admission selectivity is better.

Respond ONLY with a valid JSON object in this exact format:
{{"ttl_seconds": <int between 30 and 3600>, "admission_threshold": <float 0-1>, "eviction_priority": <int 0-2>, "reasoning": "<short explanation>"}}
"#,
        qps = metrics.qps,
        miss_rate = metrics.miss_rate,
        latency = metrics.latency_p99_ms,
        cpu = metrics.cpu_utilization,
        gpu = metrics.gpu_utilization,
    )
}

/// Next-cluster prediction prompt over a tenant's recent cluster accesses.
pub fn prefetch_prompt(history: &[i64]) -> String {
    let history = history
        .iter()
        .map(|c| format!("- cluster {c}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        r#"You are an optimization engine for a vector database.
Given a sequence of cluster accesses, predict the next cluster likely to be queried.

Access History:
{history}

Predict the next access in JSON format: {{"prediction": "<description>", "confidence": <float 0-1>, "cluster_id": <int>}}
"#
    )
}

/// TTL recommendation prompt for one cluster.
pub fn ttl_advice_prompt(cluster_id: i64, access_rate: f64, last_update_secs: f64) -> String {
    format!(
        r#"Analyze the following cluster access patterns and recommend a TTL policy.

Cluster ID: {cluster_id}
Access Rate: {access_rate} ops/sec
Last Update: {last_update_secs} seconds ago

Recommend JSON: {{"action": "keep" | "shorten" | "evict", "cluster_id": {cluster_id}, "ttl_seconds": <int>}}
"#
    )
}
