use crate::config::Config;
use crate::orchestrator::TaggingOrchestrator;
use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Initialize and start the scheduler.
///
/// One cron job per configured HH:MM time; each job drains every configured
/// content type batch-by-batch until exhausted.
pub async fn start_scheduler(
    config: Arc<Config>,
    orchestrator: Arc<TaggingOrchestrator>,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    for time in &config.schedule_times {
        let cron_expr = time_to_cron(time)?;
        info!("Scheduling tagging job for {} (cron: {})", time, cron_expr);

        let config_clone = Arc::clone(&config);
        let orchestrator_clone = Arc::clone(&orchestrator);

        let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
            let config = Arc::clone(&config_clone);
            let orchestrator = Arc::clone(&orchestrator_clone);

            Box::pin(async move {
                info!("Scheduled tagging job triggered");
                if let Err(e) = run_tagging_job(&config, &orchestrator).await {
                    error!("Scheduled tagging job failed: {}", e);
                }
            })
        })?;

        scheduler.add(job).await?;
    }

    scheduler.start().await?;
    info!("Scheduler started");

    Ok(scheduler)
}

/// Convert time string (HH:MM) to a UTC cron expression.
fn time_to_cron(time: &str) -> Result<String> {
    let parts: Vec<&str> = time.split(':').collect();
    if parts.len() != 2 {
        anyhow::bail!("Invalid time format: {}. Expected HH:MM", time);
    }

    let hour: u8 = parts[0].parse()?;
    let minute: u8 = parts[1].parse()?;
    if hour > 23 || minute > 59 {
        anyhow::bail!("Invalid time value: {}", time);
    }

    // Cron format: "second minute hour day month day_of_week"
    Ok(format!("0 {} {} * * *", minute, hour))
}

/// Run one full tagging pass: every content type, batch by batch until the
/// orchestrator reports nothing remains. The engine is synchronous blocking
/// I/O, so batches run on the blocking pool.
pub async fn run_tagging_job(
    config: &Config,
    orchestrator: &Arc<TaggingOrchestrator>,
) -> Result<()> {
    info!("Starting tagging job");

    for content_type in &config.content_types {
        let mut offset = 0u64;

        loop {
            let orchestrator = Arc::clone(orchestrator);
            let content_type_owned = content_type.clone();
            let batch_size = config.batch_size;

            let outcome = tokio::task::spawn_blocking(move || {
                orchestrator.run(&content_type_owned, batch_size, offset)
            })
            .await?;

            match outcome {
                Ok(outcome) => {
                    if !outcome.remaining {
                        break;
                    }
                    offset += config.batch_size;
                }
                Err(e) => {
                    // One content type failing must not starve the others
                    error!(content_type = %content_type, offset, "Tagging batch failed: {}", e);
                    break;
                }
            }
        }
    }

    info!("Tagging job completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== time_to_cron Tests ====================

    #[test]
    fn test_time_to_cron_valid() {
        assert_eq!(time_to_cron("02:00").unwrap(), "0 0 2 * * *");
        assert_eq!(time_to_cron("23:59").unwrap(), "0 59 23 * * *");
        assert_eq!(time_to_cron("08:30").unwrap(), "0 30 8 * * *");
    }

    #[test]
    fn test_time_to_cron_invalid_format() {
        assert!(time_to_cron("0200").is_err());
        assert!(time_to_cron("2:0:0").is_err());
        assert!(time_to_cron("").is_err());
    }

    #[test]
    fn test_time_to_cron_out_of_range() {
        assert!(time_to_cron("24:00").is_err());
        assert!(time_to_cron("12:60").is_err());
    }

    #[test]
    fn test_time_to_cron_non_numeric() {
        assert!(time_to_cron("ab:cd").is_err());
    }
}
