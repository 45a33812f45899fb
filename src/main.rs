use clap::Parser;
use std::error::Error;
use std::io::Write;
use tracing::{error, info};

use insightflow::catalog::Project;
use insightflow::config::{
    AppConfig, AskArgs, ChatCommand, CliArgs, Command, LogFormat, OutputFormat, ProjectCommand,
};
use insightflow::conversation::ConversationTurn;
use insightflow::pipeline::ChatAnswer;
use insightflow::state::AppState;
use insightflow::util::logging::init_tracing;
use insightflow::util::output::{render_table, write_csv};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            init_tracing(LogFormat::Pretty);
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_tracing(config.logging.format);
    let user = config.default_user.clone();
    info!("Running as {}", user);

    let state = AppState::new(config)?;

    match args.command {
        Command::Project(command) => run_project(&state, &user, command).await?,
        Command::Chat(command) => run_chat(&state, &user, command).await?,
        Command::Ask(ask) => run_ask(&state, &user, ask).await?,
    }

    Ok(())
}

async fn run_project(state: &AppState, user: &str, command: ProjectCommand) -> Result<(), Box<dyn Error>> {
    match command {
        ProjectCommand::Create {
            name,
            file,
            description,
        } => {
            let project = state
                .create_project(user, &name, description.as_deref(), &file)
                .await?;
            println!("Created project {} ({})", project.id, project.name);
            print_project(&project);
        }
        ProjectCommand::List => {
            let projects = state.list_projects(user).await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            for project in projects {
                println!(
                    "{}\t{}\t{}\t{}",
                    project.id,
                    project.name,
                    project.original_filename.as_deref().unwrap_or("-"),
                    project.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ProjectCommand::Show { id } => {
            print_project(&state.get_project(user, id).await?);
        }
        ProjectCommand::Schema { id } => {
            let project = state.get_project(user, id).await?;
            println!("{}", serde_json::to_string_pretty(&project.schema)?);
        }
        ProjectCommand::SetSchema { id, file } => {
            let text = std::fs::read_to_string(&file)?;
            let schema = state.import_schema(user, id, &text).await?;
            println!("Schema of project {} replaced ({} tables)", id, schema.tables.len());
        }
        ProjectCommand::Delete { id } => {
            state.delete_project(user, id).await?;
            println!("Deleted project {}", id);
        }
    }
    Ok(())
}

async fn run_chat(state: &AppState, user: &str, command: ChatCommand) -> Result<(), Box<dyn Error>> {
    match command {
        ChatCommand::Create { project, title } => {
            let chat = state.create_chat(user, project, title.as_deref()).await?;
            println!("Created chat {} ({}) in project {}", chat.id, chat.title, chat.project_id);
        }
        ChatCommand::List { project } => {
            let chats = state.list_chats(user, project).await?;
            if chats.is_empty() {
                println!("No chats.");
            }
            for chat in chats {
                println!(
                    "{}\t{}\tproject {}\t{}",
                    chat.id,
                    chat.title,
                    chat.project_id,
                    chat.created_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        ChatCommand::Show { id } => {
            let (chat, turns) = state.get_chat(user, id).await?;
            println!("Chat {}: {} (project {})", chat.id, chat.title, chat.project_id);
            for turn in &turns {
                print_turn(turn);
            }
        }
        ChatCommand::Delete { id } => {
            state.delete_chat(user, id).await?;
            println!("Deleted chat {}", id);
        }
    }
    Ok(())
}

async fn run_ask(state: &AppState, user: &str, ask: AskArgs) -> Result<(), Box<dyn Error>> {
    let answer = state.ask(user, ask.chat, &ask.question).await?;

    match ask.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&answer)?),
        OutputFormat::Csv => {
            if let Some(rows) = &answer.data {
                let stdout = std::io::stdout();
                write_csv(&answer.columns, rows, stdout.lock())?;
            } else {
                print_answer(&answer);
            }
        }
        OutputFormat::Table => print_answer(&answer),
    }
    Ok(())
}

fn print_project(project: &Project) {
    println!("Name:        {}", project.name);
    if let Some(description) = &project.description {
        println!("Description: {}", description);
    }
    if let Some(filename) = &project.original_filename {
        println!("Source file: {}", filename);
    }
    println!("Store:       {}", project.store_path.display());
    for table in &project.schema.tables {
        println!("Table {}: {}", table.name, table.description);
        for column in &table.columns {
            println!("  {} {} {}", column.name, column.column_type, column.description);
        }
    }
}

fn print_turn(turn: &ConversationTurn) {
    println!("[{}] {}: {}", turn.created_at.format("%H:%M:%S"), turn.role, turn.content);
    if let Some(sql) = &turn.sql_query {
        println!("    SQL: {}", sql);
    }
    if let Some(error) = &turn.error_message {
        println!("    Error: {}", error);
    }
}

fn print_answer(answer: &ChatAnswer) {
    println!("{}", answer.turn.content);
    if let Some(sql) = &answer.turn.sql_query {
        println!("\nSQL: {}", sql);
    }
    if let Some(error) = &answer.turn.error_message {
        println!("Error: {}", error);
    }
    for insight in &answer.insights {
        println!("- {}", insight);
    }
    if let Some(visualization) = answer.visualization_type {
        println!("Suggested chart: {}", visualization);
    }
    if let Some(rows) = &answer.data {
        println!();
        print!("{}", render_table(&answer.columns, rows));
    }
    let _ = std::io::stdout().flush();
}
