// ワーカーループ - リース → 処理 → コミット → 空になったら集計
//
// ジョブは常に1件ずつ最後まで処理する。キャンセルはサイクルの合間にだけ確認する。

use crate::core::{
    ChartRenderer, DatasetHistogram, EmbeddingProvider, ErrorDisposition, ExperimentResult, OcrEngine, ResultTable,
};
use crate::engine::aggregator::ResultAggregator;
use crate::engine::lease_manager::{FanOutReport, JobLeaseManager, LeaseOutcome};
use crate::engine::runner::ExperimentRunner;
use crate::queue::QueueTransport;
use crate::storage::ObjectStore;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// サイクルをまたいで引き継ぐ状態
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopState {
    /// 直前のサイクルでジョブを処理したか（キューが空になった時の集計判定に使う）
    pub last_cycle_processed_job: bool,
    pub last_experiment_id: Option<String>,
}

/// 次のサイクルまでの待ち方
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    Continue,
    Idle,
}

/// 1サイクルの結果
#[derive(Debug, Clone, PartialEq)]
pub enum CycleReport {
    JobProcessed { experiment_id: String, committed: bool },
    JobFailed { experiment_id: String },
    Expanded(FanOutReport),
    Malformed { message_id: String },
    TransportFailed,
    /// キューが空。直前にジョブを処理していれば集計結果を持つ
    Drained { aggregated: Option<DatasetHistogram> },
}

impl CycleReport {
    pub fn next_step(&self) -> NextStep {
        match self {
            Self::JobProcessed { .. } | Self::Expanded(_) => NextStep::Continue,
            Self::JobFailed { .. } | Self::Malformed { .. } | Self::TransportFailed | Self::Drained { .. } => {
                NextStep::Idle
            }
        }
    }
}

/// ループ全体の統計
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: usize,
    pub jobs_processed: usize,
    pub jobs_failed: usize,
    pub expansions: usize,
    pub malformed: usize,
    pub transport_failures: usize,
    pub aggregations: usize,
}

impl LoopStats {
    fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        match report {
            CycleReport::JobProcessed { .. } => self.jobs_processed += 1,
            CycleReport::JobFailed { .. } => self.jobs_failed += 1,
            CycleReport::Expanded(_) => self.expansions += 1,
            CycleReport::Malformed { .. } => self.malformed += 1,
            CycleReport::TransportFailed => self.transport_failures += 1,
            CycleReport::Drained { aggregated } => {
                if aggregated.is_some() {
                    self.aggregations += 1;
                }
            }
        }
    }
}

pub struct WorkerLoop<Q, S, O, E, T, C>
where
    Q: QueueTransport,
    S: ObjectStore,
    O: OcrEngine,
    E: EmbeddingProvider,
    T: ResultTable,
    C: ChartRenderer,
{
    lease_manager: JobLeaseManager<Q, S>,
    runner: ExperimentRunner<O, E, S, T, C>,
    aggregator: ResultAggregator<T, S, C>,
    idle_interval: Duration,
}

impl<Q, S, O, E, T, C> WorkerLoop<Q, S, O, E, T, C>
where
    Q: QueueTransport,
    S: ObjectStore,
    O: OcrEngine + 'static,
    E: EmbeddingProvider + 'static,
    T: ResultTable,
    C: ChartRenderer,
{
    pub fn new(
        lease_manager: JobLeaseManager<Q, S>,
        runner: ExperimentRunner<O, E, S, T, C>,
        aggregator: ResultAggregator<T, S, C>,
    ) -> Self {
        Self {
            lease_manager,
            runner,
            aggregator,
            idle_interval: Duration::from_secs(5),
        }
    }

    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = idle_interval;
        self
    }

    /// 1サイクルを実行し、更新した状態と結果を返す
    ///
    /// 致命的なエラーのみ`Err`を返す。
    pub async fn run_cycle(&self, mut state: LoopState) -> ExperimentResult<(LoopState, CycleReport)> {
        let report = match self.lease_manager.try_lease_next().await {
            LeaseOutcome::Delivered(request) => match self.runner.process_job(&request).await {
                Ok(result) => {
                    let committed = self.lease_manager.commit(&request.lease).await;
                    state.last_cycle_processed_job = true;
                    state.last_experiment_id = Some(result.experiment_id.clone());
                    CycleReport::JobProcessed {
                        experiment_id: result.experiment_id,
                        committed,
                    }
                }
                Err(e) => {
                    error!(
                        experiment_id = %request.experiment_id,
                        input = %request.input_ref,
                        severity = e.severity().as_str(),
                        error = %e,
                        "Job failed; message will be redelivered after lease expiry"
                    );
                    if e.disposition() == ErrorDisposition::Fatal {
                        return Err(e);
                    }
                    state.last_cycle_processed_job = false;
                    CycleReport::JobFailed {
                        experiment_id: request.experiment_id,
                    }
                }
            },
            LeaseOutcome::Empty => {
                let mut aggregated = None;
                if state.last_cycle_processed_job {
                    if let Some(experiment_id) = state.last_experiment_id.as_deref() {
                        match self.aggregator.aggregate(experiment_id).await {
                            Ok(histogram) => aggregated = Some(histogram),
                            Err(e) => warn!(experiment_id = %experiment_id, error = %e, "Aggregation failed"),
                        }
                    }
                    state.last_cycle_processed_job = false;
                }
                CycleReport::Drained { aggregated }
            }
            LeaseOutcome::Expanded(fan_out) => CycleReport::Expanded(fan_out),
            LeaseOutcome::Malformed { message_id } => CycleReport::Malformed { message_id },
            LeaseOutcome::TransportFailed => CycleReport::TransportFailed,
        };

        debug!(?report, last_cycle_processed_job = state.last_cycle_processed_job, "Cycle finished");
        Ok((state, report))
    }

    /// キャンセルされるまでサイクルを繰り返す
    pub async fn run(&self, cancel: CancellationToken) -> ExperimentResult<LoopStats> {
        info!(idle_interval_secs = self.idle_interval.as_secs(), "Worker loop started");
        let mut state = LoopState::default();
        let mut stats = LoopStats::default();

        while !cancel.is_cancelled() {
            let (next_state, report) = self.run_cycle(state).await?;
            state = next_state;
            stats.record(&report);

            if report.next_step() == NextStep::Idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.idle_interval) => {}
                }
            }
        }

        info!(
            cycles = stats.cycles,
            jobs_processed = stats.jobs_processed,
            jobs_failed = stats.jobs_failed,
            aggregations = stats.aggregations,
            "Worker loop stopped"
        );
        Ok(stats)
    }

    /// キューが空になるまで処理して戻る（単発実行用）
    ///
    /// 不正メッセージは待たずに次へ進み、トランスポート障害では中断する。
    pub async fn drain(&self) -> ExperimentResult<LoopStats> {
        let mut state = LoopState::default();
        let mut stats = LoopStats::default();
        loop {
            let (next_state, report) = self.run_cycle(state).await?;
            state = next_state;
            stats.record(&report);
            if matches!(report, CycleReport::Drained { .. } | CycleReport::TransportFailed) {
                break;
            }
        }
        Ok(stats)
    }
}
