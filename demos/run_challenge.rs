//! Walkthrough of the challenge pipeline.
//!
//! Runs go through the `codequest-js-runner` binary, so build it first:
//! `cargo build --bins && cargo run --example run_challenge`.

use codequest::{experience_award, ChallengeRegistry, ChallengeSession, SandboxConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== CodeQuest Sandbox Demo ===\n");

    let session = ChallengeSession::new(ChallengeRegistry::with_builtins(), SandboxConfig::default());

    let caps = session.harness().capabilities();
    println!(
        "Engine: {} (loop limit {}, recursion limit {})\n",
        caps.name, caps.loop_iteration_limit, caps.recursion_limit
    );

    println!("Available challenges:");
    for challenge in session.registry().all() {
        println!(
            "  - {} [{}] {}",
            challenge.id, challenge.difficulty, challenge.title
        );
    }
    println!();

    // Example 1: a correct answer
    println!("Example 1: Security Initialization");
    let result = session
        .run_challenge("security-initialization", r#"let securityCode = "9876";"#)
        .await?;
    print_verdict(&result);
    if let (true, Some(challenge)) = (result.solved(), session.registry().get("security-initialization")) {
        println!(
            "Experience earned: {}\n",
            experience_award(challenge.difficulty, &result.metrics)
        );
    }

    // Example 2: a logic bug caught by the test cases
    println!("Example 2: Logic Gates with a bug");
    let code = r#"
function routePower(gate1, gate2, gate3) {
  return gate1 || gate2 || gate3;
}
"#;
    let result = session.run_challenge("logic-gates", code).await?;
    print_verdict(&result);
    for test in &result.metrics.test_results {
        let marker = if test.passed { "pass" } else { "FAIL" };
        println!(
            "  [{}] {} (expected {}, got {})",
            marker,
            test.description,
            test.expected.inspect(),
            test.actual.inspect()
        );
    }
    println!();

    // Example 3: blocked constructs never reach the interpreter
    println!("Example 3: Blocked code");
    let result = session
        .run_challenge("security-initialization", "window.securityCode = '9876';")
        .await?;
    print_verdict(&result);

    // Example 4: runaway loops are killed at the time limit
    println!("Example 4: Runaway loop");
    let result = session
        .run_challenge("array-operations", "for (let i = 0; ; i++) {}")
        .await?;
    print_verdict(&result);

    Ok(())
}

fn print_verdict(result: &codequest::ExecutionResult) {
    for line in &result.console {
        println!("  console.{:?}: {}", line.level, line.message);
    }
    match (&result.error, &result.validation) {
        (Some(error), _) => println!("Error ({:?}): {}", result.error_kind, error),
        (None, Some(validation)) => println!(
            "{}: {}",
            if validation.success { "Passed" } else { "Not yet" },
            validation.message
        ),
        (None, None) => println!("Ran in {}ms", result.metrics.execution_time),
    }
    println!();
}
