// SPDX-License-Identifier: Apache-2.0

//! Compile policybooks into target-language policy files.

use gatecheck_common::Logger;
use gatecheck_compiler::policy::PolicyTranspiler;

use crate::cli::TranspileArgs;

/// Runs the `transpile` sub-command.
pub(crate) fn command(logger: &impl Logger, args: &TranspileArgs) -> i32 {
    logger.loading(&format!(
        "Transpiling policybooks in `{}`",
        args.input.display()
    ));

    let transpiler = PolicyTranspiler::new();
    match transpiler.run(&args.input, &args.output, logger) {
        Ok(written) => {
            logger.done();
            logger.success(&format!(
                "Compiled {} policy file(s) into `{}`",
                written.len(),
                args.output.display()
            ));
            0
        }
        Err(error) => {
            logger.done();
            logger.error(&format!("Transpilation failed: {error}"));
            2
        }
    }
}
