use crate::cli::{CliCommand, OutputFormat};
use crate::output::emit_output;
use edq::{
    ConfigItem, ConfigValueType, Job, JobId, JobPage, NewJob, Pagination, QueueDb, QueueError,
    Result, Scheduler, SessionEvent, Settings, DEFAULT_PAGE_SIZE,
};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

const DEFAULT_EVENT_LIMIT: u32 = 50;

/// Connects, runs one command and closes the pool whatever the outcome.
pub async fn run(command: CliCommand, output: OutputFormat) -> Result<()> {
    let settings = Settings::from_env()?;
    let db = QueueDb::connect(&settings).await?;
    let scheduler = Scheduler::new(db.clone(), &settings);

    let result = dispatch(&scheduler, &settings, command, output).await;
    db.close().await;
    result
}

async fn dispatch(
    scheduler: &Scheduler,
    settings: &Settings,
    command: CliCommand,
    output: OutputFormat,
) -> Result<()> {
    let name = command.name();
    let payload = match command {
        CliCommand::InitDb => {
            scheduler.db().initialize_schema().await?;
            json!({"message": "Queue schema initialized", "initialized": true})
        }
        CliCommand::Enqueue {
            project_path,
            transcript_file,
            priority,
            max_retries,
        } => {
            let mut new_job = NewJob::new(project_path, transcript_file);
            if let Some(priority) = priority {
                new_job = new_job.with_priority(priority);
            }
            if let Some(max_retries) = max_retries {
                new_job = new_job.with_max_retries(max_retries);
            }
            let job = scheduler.create_job(&new_job).await?;
            job_payload(
                &format!("Queued job {} (priority {})", job.id, job.priority),
                &job,
            )?
        }
        CliCommand::Get { id } => {
            let job = scheduler
                .get_job(id)
                .await?
                .ok_or_else(|| QueueError::not_found("job", id))?;
            job_payload(&describe_job(&job), &job)?
        }
        CliCommand::List {
            status,
            page,
            page_size,
        } => {
            let pagination =
                Pagination::new(page.unwrap_or(1), page_size.unwrap_or(DEFAULT_PAGE_SIZE))?;
            let page = scheduler.list_jobs(status, pagination).await?;
            page_payload(&page)?
        }
        CliCommand::Stats => {
            let counts = scheduler.count_jobs_by_status().await?;
            let lines = counts
                .iter()
                .map(|(status, count)| format!("{:<12} {count}", status.as_str()))
                .collect::<Vec<_>>()
                .join("\n");
            let by_status = counts
                .iter()
                .map(|(status, count)| (status.as_str().to_string(), json!(count)))
                .collect::<serde_json::Map<_, _>>();
            json!({"message": lines, "counts": by_status})
        }
        CliCommand::ClaimNext => match scheduler.claim_next().await? {
            Some(job) => job_payload(&format!("Claimed job {}", job.id), &job)?,
            None => json!({"message": "No pending jobs", "job": Value::Null}),
        },
        CliCommand::Heartbeat { id } => {
            let recorded = scheduler.heartbeat(id).await?;
            let message = if recorded {
                format!("Heartbeat recorded for job {id}")
            } else {
                format!("Job {id} is not in progress; heartbeat ignored")
            };
            json!({"message": message, "job_id": id, "recorded": recorded})
        }
        CliCommand::Update { id, patch } => {
            let job = scheduler.update_job(id, &patch).await?;
            job_payload(&describe_job(&job), &job)?
        }
        CliCommand::Delete { id } => {
            let deleted = scheduler.delete_job(id).await?;
            delete_payload(id, deleted)
        }
        CliCommand::Events {
            id,
            event_type,
            limit,
        } => {
            let events = match id {
                Some(id) => {
                    let mut events = scheduler.events_for_job(id).await?;
                    events.retain(|event| event_type.is_none_or(|wanted| event.event_type == wanted));
                    events
                }
                None => {
                    scheduler
                        .recent_events(event_type, limit.unwrap_or(DEFAULT_EVENT_LIMIT))
                        .await?
                }
            };
            events_payload(&events)?
        }
        CliCommand::ConfigGet { key } => {
            let item = scheduler
                .get_config(&key)
                .await?
                .ok_or_else(|| QueueError::not_found("config", &key))?;
            config_payload(&item)?
        }
        CliCommand::ConfigSet {
            key,
            value,
            value_type,
            description,
        } => {
            let item = scheduler
                .set_config(
                    &key,
                    &value,
                    value_type.unwrap_or(ConfigValueType::String),
                    description.as_deref(),
                )
                .await?;
            config_payload(&item)?
        }
        CliCommand::ConfigList => {
            let items = scheduler.list_config().await?;
            let lines = items
                .iter()
                .map(|item| format!("{} = {} ({})", item.key, item.value, item.value_type))
                .collect::<Vec<_>>()
                .join("\n");
            json!({"message": lines, "items": serde_json::to_value(&items)?})
        }
        CliCommand::Reap { threshold_minutes } => {
            let summary = scheduler.run_stuck_job_cleanup(threshold_minutes).await?;
            let message = format!(
                "Reset {} job(s), failed {} job(s)",
                summary.reset_count, summary.failed_count
            );
            json!({"message": message, "summary": serde_json::to_value(&summary)?})
        }
        CliCommand::Reaper { interval_secs } => {
            let interval = interval_secs.map_or_else(|| settings.reaper_interval(), Duration::from_secs);
            let sweeps = scheduler
                .run_reaper_loop(interval, async {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        tracing::warn!(error = %err, "Failed to listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                    info!("Shutdown requested");
                })
                .await;
            json!({"message": format!("Reaper stopped after {sweeps} sweep(s)"), "sweeps": sweeps})
        }
    };

    emit_output(output, name, &payload);
    Ok(())
}

fn describe_job(job: &Job) -> String {
    let phase = job.current_phase.as_deref().unwrap_or("-");
    format!(
        "Job {} [{}] priority={} phase={} retries={}/{} project={}",
        job.id,
        job.status,
        job.priority,
        phase,
        job.retry_count,
        job.max_retries,
        job.project_name.as_deref().unwrap_or(&job.project_path),
    )
}

fn delete_payload(id: JobId, deleted: bool) -> Value {
    let message = if deleted {
        format!("Deleted job {id}")
    } else {
        format!("Job {id} not found; nothing deleted")
    };
    json!({"message": message, "job_id": id, "deleted": deleted})
}

fn job_payload(message: &str, job: &Job) -> Result<Value> {
    Ok(json!({"message": message, "job": serde_json::to_value(job)?}))
}

fn page_payload(page: &JobPage) -> Result<Value> {
    let mut lines = page.jobs.iter().map(describe_job).collect::<Vec<_>>();
    lines.push(format!(
        "page {}/{} ({} job(s) total)",
        page.page, page.total_pages, page.total
    ));
    Ok(json!({"message": lines.join("\n"), "page": serde_json::to_value(page)?}))
}

fn events_payload(events: &[SessionEvent]) -> Result<Value> {
    let lines = events
        .iter()
        .map(|event| {
            let job = event
                .job_id
                .map_or_else(|| "-".to_string(), |id| id.to_string());
            let data = event
                .data
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?
                .unwrap_or_default();
            Ok(format!(
                "{} job={job} {} {data}",
                event.timestamp.to_rfc3339(),
                event.event_type
            ))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(json!({"message": lines.join("\n"), "events": serde_json::to_value(events)?}))
}

fn config_payload(item: &ConfigItem) -> Result<Value> {
    Ok(json!({
        "message": format!("{} = {} ({})", item.key, item.value, item.value_type),
        "item": serde_json::to_value(item)?,
    }))
}
