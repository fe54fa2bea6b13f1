//! ralph-ollama - run the study/implement/test/update loop against a local
//! Ollama model.

use clap::{Parser, Subcommand};
use colored::Colorize;
use ralph_ollama::llm::OllamaClient;
use ralph_ollama::r#loop::extract::extract_files;
use ralph_ollama::r#loop::{LoopEngine, LoopMode, Phase, TaskList};
use ralph_ollama::ProjectConfig;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

#[derive(Parser)]
#[command(name = "ralph-ollama")]
#[command(version)]
#[command(about = "Autonomous study/implement/test/update loop backed by a local Ollama model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory (defaults to current directory)
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit log lines as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a new project with README, directories and @fix_plan.md
    Init {
        /// Project name
        name: String,

        /// What the project is about; used to generate tasks
        #[arg(short, long)]
        description: String,

        /// First High Priority task
        #[arg(short, long)]
        task: Option<String>,
    },

    /// Run the loop until the task list is exhausted
    Run {
        /// Loop mode: non-stop or phase-by-phase
        #[arg(short, long, value_enum, default_value = "non-stop")]
        mode: LoopMode,

        /// Model for every request (disables per-task routing)
        #[arg(long, env = "RALPH_OLLAMA_MODEL")]
        model: Option<String>,

        /// Ollama server address
        #[arg(long, env = "OLLAMA_HOST")]
        host: Option<String>,
    },

    /// List incomplete tasks in priority order
    Tasks {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Add tasks to the High Priority section
    Add {
        /// Task descriptions
        #[arg(required = true)]
        tasks: Vec<String>,
    },

    /// Show the files a model response would produce
    Extract {
        /// File containing the response text
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show or validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Validate .ralph/settings.json
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "ralph_ollama=debug,info"
    } else {
        "ralph_ollama=info,warn"
    };

    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }

    let project_path = cli.project.canonicalize().unwrap_or(cli.project.clone());

    if !matches!(cli.command, Commands::Init { .. }) && !project_path.exists() {
        eprintln!(
            "{} Project directory does not exist: {}",
            "Error:".red().bold(),
            project_path.display()
        );
        std::process::exit(1);
    }

    match cli.command {
        Commands::Init {
            name,
            description,
            task,
        } => {
            let config = load_config(&project_path);
            let client = Arc::new(OllamaClient::from_config(&config.generation));
            let engine = LoopEngine::with_config(&project_path, config, client);

            if let Err(e) = engine.initialize_project(&name, &description, task.as_deref()) {
                eprintln!("{} {}", "Error:".red().bold(), e);
                std::process::exit(e.exit_code());
            }

            println!(
                "{} Initialized {} at {}",
                "OK".green().bold(),
                name.cyan(),
                project_path.display()
            );
            if task.is_none() {
                println!(
                    "   No initial task; tasks will be generated from the description on first run"
                );
            }
        }

        Commands::Run { mode, model, host } => {
            let mut config = load_config(&project_path);
            if let Some(model) = &model {
                config.generation.model = model.clone();
            }
            if let Some(host) = host {
                config.generation.host = host;
            }
            if let Err(e) = config.validate() {
                eprintln!("{} {}", "Error:".red().bold(), e);
                std::process::exit(e.exit_code());
            }

            let mut client = OllamaClient::from_config(&config.generation);
            if model.is_some() {
                client = client.pinned();
            }

            println!(
                "{} {} in {} mode with {} ({})",
                "Starting".cyan().bold(),
                project_path.display(),
                mode,
                client.default_model(),
                client.host()
            );

            let engine = LoopEngine::with_config(&project_path, config, Arc::new(client));
            if let Err(e) = engine.start(mode) {
                eprintln!("{} {}", "Error:".red().bold(), e);
                std::process::exit(e.exit_code());
            }

            drive(&engine, mode).await?;
            print_summary(&engine);

            if engine.get_status().current_phase == Phase::Error {
                std::process::exit(1);
            }
        }

        Commands::Tasks { json } => {
            let tasks = TaskList::new(&project_path).read_incomplete_tasks()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("No incomplete tasks");
            } else {
                for (i, task) in tasks.iter().enumerate() {
                    println!("{:>3}. {}", i + 1, task);
                }
            }
        }

        Commands::Add { tasks } => {
            let list = TaskList::new(&project_path);
            list.append_tasks(&tasks)?;
            println!(
                "{} Added {} task(s) to {}",
                "OK".green().bold(),
                tasks.len(),
                list.path().display()
            );
        }

        Commands::Extract { file, json } => {
            let text = std::fs::read_to_string(&file)?;
            let files = extract_files(&text);
            if json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else if files.is_empty() {
                println!("No code blocks found");
            } else {
                for generated in &files {
                    println!(
                        "{} ({} lines)",
                        generated.path.cyan(),
                        generated.content.lines().count()
                    );
                }
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let config = ProjectConfig::load(&project_path)?;
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Validate => match ProjectConfig::load(&project_path) {
                Ok(_) => println!("{} Configuration is valid", "OK".green().bold()),
                Err(e) => {
                    eprintln!("{} {}", "Error:".red().bold(), e);
                    std::process::exit(e.exit_code());
                }
            },
        },
    }

    Ok(())
}

/// Load settings, falling back to defaults with a warning.
fn load_config(project_path: &Path) -> ProjectConfig {
    match ProjectConfig::load(project_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}; using defaults", "Warning:".yellow().bold(), e);
            ProjectConfig::default()
        }
    }
}

/// Wait for the loop to finish, prompting for resume in phase-by-phase mode.
async fn drive(engine: &LoopEngine, mode: LoopMode) -> anyhow::Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if mode == LoopMode::NonStop {
            tokio::select! {
                _ = engine.wait_until_finished() => return Ok(()),
                _ = tokio::signal::ctrl_c() => return interrupt(engine).await,
            }
        }

        tokio::select! {
            _ = engine.wait_until_paused() => {}
            _ = tokio::signal::ctrl_c() => return interrupt(engine).await,
        }

        let status = engine.get_status();
        if !status.is_running {
            engine.wait_until_finished().await;
            return Ok(());
        }

        println!(
            "{} after {} phase. Press Enter to continue, or type feedback:",
            "Paused".yellow().bold(),
            status.current_phase
        );
        match read_answer(&mut stdin, tokio::signal::ctrl_c()).await? {
            Answer::Resume(input) => engine.resume(input),
            Answer::Closed => {
                engine.stop().await;
                return Ok(());
            }
            Answer::Interrupted => return interrupt(engine).await,
        }
    }
}

/// What the user did at the pause prompt.
#[derive(Debug, PartialEq, Eq)]
enum Answer {
    Resume(Option<String>),
    Closed,
    Interrupted,
}

/// Read one line at the pause prompt, giving up as soon as `interrupt` fires.
async fn read_answer<R, F>(lines: &mut Lines<R>, interrupt: F) -> std::io::Result<Answer>
where
    R: AsyncBufRead + Unpin,
    F: Future<Output = std::io::Result<()>>,
{
    // Lines::next_line is cancel safe
    tokio::select! {
        line = lines.next_line() => Ok(match line? {
            Some(line) => {
                let input = line.trim();
                Answer::Resume((!input.is_empty()).then(|| input.to_string()))
            }
            None => Answer::Closed,
        }),
        _ = interrupt => Ok(Answer::Interrupted),
    }
}

async fn interrupt(engine: &LoopEngine) -> anyhow::Result<()> {
    println!("\n{} stopping loop", "Interrupted:".yellow().bold());
    engine.stop().await;
    Ok(())
}

fn print_summary(engine: &LoopEngine) {
    let history = engine.phase_history();
    let status = engine.get_status();

    println!("\n{}", "Phase history".bold());
    println!("{}", "─".repeat(60));
    for record in &history {
        let mark = if record.success {
            "✓".green().to_string()
        } else {
            "✗".red().to_string()
        };
        println!(
            "{} {:<10} {:>6.1}s  {}",
            mark,
            record.phase.label(),
            record.duration_secs,
            record.task
        );
        if let Some(warning) = &record.warning {
            println!("   {} {}", "warning:".yellow(), warning);
        }
        if let Some(error) = &record.error {
            println!("   {} {}", "error:".red(), error);
        }
        for path in &record.files_written {
            println!("   {} {}", "+".green(), path);
        }
    }

    let final_phase = match status.current_phase {
        Phase::Complete => status.current_phase.to_string().green().bold(),
        Phase::Error => status.current_phase.to_string().red().bold(),
        other => other.to_string().yellow().bold(),
    };
    println!("{}", "─".repeat(60));
    println!("Finished in {} after {} phases", final_phase, history.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_answer_interrupted_while_waiting_for_input() {
        // Writer half kept open so the read never completes
        let (_writer, reader) = tokio::io::duplex(64);
        let mut lines = BufReader::new(reader).lines();

        let answer = read_answer(&mut lines, async { Ok(()) }).await.unwrap();
        assert_eq!(answer, Answer::Interrupted);
    }

    #[tokio::test]
    async fn test_answer_lines_and_eof() {
        let mut lines = BufReader::new(&b"  keep it short \n\n"[..]).lines();

        let first = read_answer(&mut lines, std::future::pending()).await.unwrap();
        assert_eq!(first, Answer::Resume(Some("keep it short".to_string())));
        let second = read_answer(&mut lines, std::future::pending()).await.unwrap();
        assert_eq!(second, Answer::Resume(None));
        let third = read_answer(&mut lines, std::future::pending()).await.unwrap();
        assert_eq!(third, Answer::Closed);
    }
}
