// SPDX-License-Identifier: Apache-2.0

//! Evaluate compiled policies against a project or a runtime artifact.

use std::fs;
use std::io::{IsTerminal, Read};
use std::path::Path;

use gatecheck_common::Logger;
use gatecheck_engine::OpaEngine;
use gatecheck_evaluator::evaluator::{EvalRequest, EvalType, PolicyEvaluator};
use gatecheck_evaluator::input::{ApiRequest, Event};
use gatecheck_evaluator::result::{Format, ResultFormatter};

use crate::cli::EvalArgs;

/// Runs the `eval` sub-command. Exit code 0 when no violation was detected,
/// 1 when one was, 2 on a fatal error.
pub(crate) fn command(logger: &impl Logger, args: &EvalArgs) -> i32 {
    match run(logger, args) {
        Ok(exit_code) => exit_code,
        Err(error) => {
            logger.error(&format!("Evaluation failed: {error}"));
            2
        }
    }
}

fn run(logger: &impl Logger, args: &EvalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let eval_type = EvalType::parse(&args.eval_type)?;
    let format = Format::parse(&args.format)?;
    let engine = OpaEngine::with_executable(args.engine.clone());

    let evaluator = if let Some(config) = &args.config {
        PolicyEvaluator::from_config(config, args.root_dir.clone(), engine, logger)?
    } else if let Some(policy_dir) = &args.policy_dir {
        PolicyEvaluator::from_policy_dir(policy_dir, args.root_dir.clone(), engine, logger)?
    } else {
        return Err("either --config or --policy-dir is required".into());
    };

    let mut request = EvalRequest {
        project_dir: args.project_dir.clone(),
        scan_result_path: args.scan_result.clone(),
        external_data_path: args.external_data.clone(),
        variables_path: args.variables.clone(),
        ..EvalRequest::default()
    };

    match eval_type {
        EvalType::Jobdata => {
            request.jobdata = Some(match &args.jobdata {
                Some(path) => fs::read_to_string(path)?,
                None => read_stdin()?,
            });
        }
        EvalType::TaskResult => {
            let path = args
                .task_result
                .as_ref()
                .ok_or("a task_result evaluation requires --task-result")?;
            request.task_result = Some(read_json(path)?);
        }
        EvalType::Event => {
            let path = args
                .event
                .as_ref()
                .ok_or("an event evaluation requires --event")?;
            let event: Event = serde_json::from_value(read_json(path)?)?;
            request.event = Some(event);
        }
        EvalType::Rest => {
            let path = args.rest.as_ref().ok_or("a rest evaluation requires --rest")?;
            let rest: ApiRequest = serde_json::from_value(read_json(path)?)?;
            request.rest = Some(rest);
        }
        EvalType::Project => {}
    }

    let result = evaluator.run(eval_type, &request, logger)?;

    let formatter = ResultFormatter::new(
        format,
        std::io::stdout().is_terminal(),
        args.base_dir.clone(),
    );
    #[allow(clippy::print_stdout)] // The rendered result is the command output.
    {
        println!("{}", formatter.render(&result));
    }

    Ok(i32::from(result.has_violation()))
}

fn read_stdin() -> Result<String, std::io::Error> {
    let mut buffer = String::new();
    _ = std::io::stdin().read_to_string(&mut buffer)?;
    Ok(buffer)
}

fn read_json(path: &Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}
