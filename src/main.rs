// RLM-Agent: Command line entry point

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use rlm_agent::llm::scripted::demo_backend;
use rlm_agent::llm::{connect, LlmConfig, ProviderType, RetryConfig};
use rlm_agent::{AgentLoop, ExecutionSandbox, RLMConfig, RLMResult, RlmError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() {
    // Logs go to stderr so answers on stdout stay pipeable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_help();
        std::process::exit(1);
    }

    let outcome = match args[1].as_str() {
        "--help" | "-h" => {
            print_help();
            Ok(())
        }
        "--version" | "-v" => {
            println!("rlm-agent v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "run" => run_task(&args[2..]),
        "demo" => run_demo(),
        "exec" => exec_script(&args[2..]),
        other => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
    };

    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_help() {
    println!(
        r#"
RLM-Agent: Recursive Language Model agent
=========================================

USAGE:
    rlm-agent <COMMAND> [OPTIONS]

COMMANDS:
    run [OPTIONS] <prompt>    Solve a task with a real model
    demo                      Offline demo of a recursive query (scripted model)
    exec <script.rhai>        Run a script in a standalone sandbox

RUN OPTIONS:
    --config <file.json>      Agent configuration (RLMConfig as JSON)
    --provider <name>         openai | anthropic | cerebras | openrouter | compatible
    --model <name>            Model name for the provider
    --max-depth <n>           Maximum query() recursion depth
    --max-steps <n>           Maximum model turns per agent
    --context-file <file>     Load a file into the sandbox variable `context`

ENVIRONMENT:
    OPENAI_API_KEY, ANTHROPIC_API_KEY, CEREBRAS_API_KEY, OPENROUTER_API_KEY
    OPENAI_BASE_URL           Base URL for the `compatible` provider
    RUST_LOG                  Log filter (default: warn)

EXAMPLES:
    rlm-agent run --provider cerebras "Compute the 20th Fibonacci number"
    rlm-agent run --context-file report.txt "Summarize the context"
    rlm-agent demo
    rlm-agent exec scratch.rhai
"#
    );
}

#[derive(Debug, Default)]
struct RunArgs {
    config: Option<PathBuf>,
    provider: Option<String>,
    model: Option<String>,
    max_depth: Option<usize>,
    max_steps: Option<usize>,
    context_file: Option<PathBuf>,
    prompt: Vec<String>,
}

fn parse_run_args(args: &[String]) -> Result<RunArgs, RlmError> {
    let mut parsed = RunArgs::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| RlmError::Config(format!("{} needs a value", flag)))
        };
        let number = |flag: &str, text: String| {
            text.parse::<usize>()
                .map_err(|_| RlmError::Config(format!("{} expects a number, got '{}'", flag, text)))
        };

        let flag = arg.as_str();
        match flag {
            "--config" => parsed.config = Some(PathBuf::from(value(flag)?)),
            "--provider" => parsed.provider = Some(value(flag)?),
            "--model" => parsed.model = Some(value(flag)?),
            "--max-depth" => parsed.max_depth = Some(number(flag, value(flag)?)?),
            "--max-steps" => parsed.max_steps = Some(number(flag, value(flag)?)?),
            "--context-file" => parsed.context_file = Some(PathBuf::from(value(flag)?)),
            _ => parsed.prompt.push(arg.clone()),
        }
    }

    Ok(parsed)
}

fn run_task(args: &[String]) -> Result<(), RlmError> {
    let args = parse_run_args(args)?;
    if args.prompt.is_empty() {
        return Err(RlmError::Config("no prompt given (usage: rlm-agent run [OPTIONS] <prompt>)".to_string()));
    }

    let mut config = match &args.config {
        Some(path) => RLMConfig::from_file(path)?,
        None => RLMConfig::default(),
    };
    if let Some(depth) = args.max_depth {
        config.max_depth = depth;
    }
    if let Some(steps) = args.max_steps {
        config.max_steps = steps;
    }

    let provider = match &args.provider {
        Some(name) => ProviderType::parse(name)
            .ok_or_else(|| RlmError::Config(format!("unknown provider '{}'", name)))?,
        None => ProviderType::default(),
    };
    let mut llm_config = LlmConfig::for_provider(provider);
    if let Some(model) = &args.model {
        llm_config = llm_config.with_model(model);
    }

    let backend = connect(llm_config, RetryConfig::default())?;
    let mut agent = AgentLoop::new(backend, config)?;

    let prompt = args.prompt.join(" ");
    let result = match &args.context_file {
        Some(path) => {
            let context = std::fs::read_to_string(path)
                .map_err(|e| RlmError::Io(format!("{}: {}", path.display(), e)))?;
            agent.run_with_context(&prompt, &context)?
        }
        None => agent.run(&prompt)?,
    };

    report(&result);
    Ok(())
}

fn run_demo() -> Result<(), RlmError> {
    let backend = Arc::new(demo_backend());
    let mut agent = AgentLoop::new(backend.clone(), RLMConfig::default())?;

    let result = agent.run("Compute complex value")?;
    for message in agent.messages().iter().skip(1) {
        eprintln!("--- {} ---\n{}\n", message.role, message.content);
    }
    eprintln!("(scripted model answered {} completion requests)", backend.call_count());

    report(&result);
    Ok(())
}

fn exec_script(args: &[String]) -> Result<(), RlmError> {
    let path = args
        .first()
        .map(PathBuf::from)
        .ok_or_else(|| RlmError::Config("no script given (usage: rlm-agent exec <script.rhai>)".to_string()))?;
    let script = std::fs::read_to_string(&path).map_err(|e| RlmError::Io(format!("{}: {}", path.display(), e)))?;

    let mut sandbox = ExecutionSandbox::standalone(&RLMConfig::default().sandbox);
    let result = sandbox.execute(&script);

    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

fn report(result: &RLMResult) {
    println!("{}", result.output);
    eprintln!(
        "[{:?}] steps={} sub_calls={} errors={} time={}ms run={}",
        result.status,
        result.steps,
        result.sub_calls,
        result.errors.len(),
        result.execution_time_ms,
        result.run_id
    );
}
