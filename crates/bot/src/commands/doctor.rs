use std::path::Path;

use musicof_core::config::{AppConfig, LoadOptions};
use musicof_slack::web::WebApiClient;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool, config_path: Option<&Path>) -> String {
    let report = build_report(config_path);

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report(config_path: Option<&Path>) -> DoctorReport {
    let options =
        LoadOptions { config_path: config_path.map(Path::to_path_buf), ..LoadOptions::default() };

    let mut checks = Vec::new();
    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(live_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            checks.push(skipped("slack_authentication"));
            checks.push(skipped("channel_visibility"));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn skipped(name: &'static str) -> DoctorCheck {
    DoctorCheck {
        name,
        status: CheckStatus::Skipped,
        details: "skipped because configuration did not load".to_string(),
    }
}

fn failed_pair(details: String) -> Vec<DoctorCheck> {
    vec![
        DoctorCheck {
            name: "slack_authentication",
            status: CheckStatus::Fail,
            details: details.clone(),
        },
        DoctorCheck { name: "channel_visibility", status: CheckStatus::Fail, details },
    ]
}

fn live_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return failed_pair(format!("failed to initialize async runtime: {error}"));
        }
    };

    runtime.block_on(async {
        let client = match WebApiClient::new(config.slack.bot_token.clone()) {
            Ok(client) => client,
            Err(error) => {
                return failed_pair(format!("failed to build the slack web client: {error}"));
            }
        };

        let authentication = match client.auth_test().await {
            Ok(identity) => DoctorCheck {
                name: "slack_authentication",
                status: CheckStatus::Pass,
                details: format!("authenticated as `{}` ({})", identity.name, identity.user_id),
            },
            Err(error) => DoctorCheck {
                name: "slack_authentication",
                status: CheckStatus::Fail,
                details: error.to_string(),
            },
        };

        let visibility = match client.channel_info(&config.slack.channel).await {
            Ok(channel) => DoctorCheck {
                name: "channel_visibility",
                status: CheckStatus::Pass,
                details: format!("found `{}` ({})", channel.name, channel.id),
            },
            Err(error) => DoctorCheck {
                name: "channel_visibility",
                status: CheckStatus::Fail,
                details: error.to_string(),
            },
        };

        vec![authentication, visibility]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
