use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::synchronizer::{CycleOutcome, Synchronizer, TableSpec};

// ═══════════════════════════════════════════════════════════════
//  Pass summary
// ═══════════════════════════════════════════════════════════════

/// Результаты одного прохода по всем таблицам, в порядке обхода.
#[derive(Debug, Default)]
pub struct PassSummary {
    pub outcomes: Vec<(String, CycleOutcome)>,
}

impl PassSummary {
    pub fn synced(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.stats().is_some()).count()
    }

    pub fn idle(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_idle()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_failed()).count()
    }

    pub fn all_ok(&self) -> bool {
        self.failed() == 0
    }
}

// ═══════════════════════════════════════════════════════════════
//  Scheduler
// ═══════════════════════════════════════════════════════════════

/// Драйвер циклов: обходит таблицы последовательно, затем спит
/// `interval`, и так до отмены.
///
/// Таблицы не пересекаются во времени: следующая начинается только
/// после полного завершения цикла предыдущей. Сбой одной таблицы не
/// влияет ни на остальные, ни на следующие проходы.
pub struct Scheduler {
    synchronizer: Synchronizer,
    tables: Vec<TableSpec>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(synchronizer: Synchronizer, tables: Vec<TableSpec>, interval: Duration) -> Self {
        Self { synchronizer, tables, interval }
    }

    pub fn tables(&self) -> &[TableSpec] {
        &self.tables
    }

    /// Один проход по всем таблицам. Отмена проверяется между таблицами:
    /// начатый цикл всегда доводится до конца.
    pub async fn run_pass(&self, token: &CancellationToken) -> PassSummary {
        let mut summary = PassSummary::default();
        for table in &self.tables {
            if token.is_cancelled() {
                tracing::info!(table = %table.name, "cancelled, skipping rest of pass");
                break;
            }
            let outcome = self.synchronizer.run_cycle(table).await;
            summary.outcomes.push((table.name.clone(), outcome));
        }
        summary
    }

    /// Бесконечный цикл проходов до отмены `token`.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(
            tables = self.tables.len(),
            interval_s = self.interval.as_secs_f64(),
            batch_size = self.synchronizer.settings().batch_size,
            "scheduler started"
        );

        let mut pass: u64 = 0;
        loop {
            pass += 1;
            let summary = self.run_pass(&token).await;
            tracing::info!(
                pass,
                synced = summary.synced(),
                idle = summary.idle(),
                failed = summary.failed(),
                "pass complete"
            );

            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!(passes = pass, "scheduler stopped");
    }
}
