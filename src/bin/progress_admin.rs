use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use progress_server::{
    certificate::{CertificateIssuer, SqliteCertificateIssuer},
    config::Config,
    course::{CourseOutline, CourseOutlineProvider, SqliteOutlineProvider},
    database,
    service::ProgressService,
    student::{create_student, delete_student, get_student_list},
    utils::init_log,
    watch::{LectureWatchTarget, PlayerEvent, WatchSession, WatchSummary, WatchTimeSink},
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines},
    sync::mpsc,
};

#[derive(Debug, clap::Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "progress.toml")]
    config: PathBuf,
    /// Overrides `database_url` of the config file
    #[arg(short, long)]
    database: Option<String>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    Course {
        #[command(subcommand)]
        command: CourseCommand,
    },
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Act as one student
    Login {
        id: i64,
        #[command(subcommand)]
        command: LoginCommand,
    },
}

#[derive(Debug, clap::Subcommand)]
enum CourseCommand {
    List,
    /// Import or replace a course outline from a JSON file
    Import {
        file: PathBuf,
        /// Certificate template JSON
        #[arg(short, long)]
        template: Option<PathBuf>,
    },
}

#[derive(Debug, clap::Subcommand)]
enum UserCommand {
    List,
    Create {
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        email: String,
    },
    Delete {
        id: i64,
    },
}

#[derive(Debug, clap::Subcommand)]
enum LoginCommand {
    ListCourses,
    Show { course_id: i64 },
    Complete { course_id: i64, chapter: usize, lecture: usize },
    Certificates,
    RetryCertificate { course_id: i64 },
    /// Drive a watch session from stdin: play, pause, hide, show, end, exit
    Watch { course_id: i64, chapter: usize, lecture: usize },
}

#[tokio::main]
async fn main() {
    let _guard = init_log(None);
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{:?}", e);
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> anyhow::Result<T> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = Config::load(Some(&args.config))?;
    if let Some(url) = args.database {
        config.database_url = url;
    }
    let database = database::connect(&config.database_url).await?;
    let service = Arc::new(ProgressService::from_database(database.clone(), &config));

    match args.command {
        Commands::Course { command } => {
            let outlines = SqliteOutlineProvider::new(database.clone(), &config.outline_cache);
            match command {
                CourseCommand::List => {
                    for course in outlines.list().await? {
                        println!("{:<20} {} ({} chapters)", course.id, course.title, course.chapter_count);
                    }
                }
                CourseCommand::Import { file, template } => {
                    println!("Importing course outline from file: {}", file.display());
                    let outline: CourseOutline = read_json(&file).await?;
                    let template: Option<serde_json::Value> = match template {
                        Some(path) => Some(read_json(&path).await?),
                        None => None,
                    };
                    outlines.put(&outline, template.as_ref()).await?;
                    println!("Course imported with id: {}", outline.course_id);
                }
            }
        }
        Commands::User { command } => match command {
            UserCommand::List => {
                println!("{:#?}", get_student_list(&database).await?);
            }
            UserCommand::Create { name, email } => {
                let id = create_student(&database, name, email).await?;
                println!("Student created with id: {}", id);
            }
            UserCommand::Delete { id } => {
                delete_student(&database, id).await?;
                println!("Student deleted with id: {}", id);
            }
        },
        Commands::Login { id, command } => match command {
            LoginCommand::ListCourses => {
                for progress in service.list_progress(id).await? {
                    println!(
                        "{:<20} {:>3}%  certificate: {}",
                        progress.course_id,
                        progress.overall_progress(),
                        progress.certificate_id().unwrap_or("-")
                    );
                }
            }
            LoginCommand::Show { course_id } => {
                let progress = service.get_progress(id, course_id).await?;
                println!("{}", serde_json::to_string_pretty(&progress)?);
            }
            LoginCommand::Complete { course_id, chapter, lecture } => {
                let status = service.complete_lecture(id, course_id, chapter, lecture).await?;
                println!(
                    "Lecture completed, overall progress {}%{}",
                    status.progress.overall_progress(),
                    if status.course_completed { ", course completed" } else { "" }
                );
            }
            LoginCommand::Certificates => {
                let issuer = SqliteCertificateIssuer::new(database.clone());
                for certificate in issuer.list_for_student(id).await? {
                    println!("{:#?}", certificate);
                }
            }
            LoginCommand::RetryCertificate { course_id } => {
                let status = service.retry_certification(id, course_id).await?;
                match status.progress.certificate_id() {
                    Some(certificate_id) => println!("Certificate: {}", certificate_id),
                    None => println!("Course not completed yet"),
                }
                let issuer = SqliteCertificateIssuer::new(database.clone());
                if let Some(certificate) = issuer.find(id, course_id).await? {
                    println!("{:#?}", certificate);
                }
            }
            LoginCommand::Watch { course_id, chapter, lecture } => {
                let outlines = SqliteOutlineProvider::new(database.clone(), &config.outline_cache);
                let outline = outlines.get(course_id).await?;
                let duration = outline.lecture(chapter, lecture)?.duration_seconds;
                let target = LectureWatchTarget {
                    service: service.clone(),
                    student_id: id,
                    course_id,
                    chapter_index: chapter,
                    lecture_index: lecture,
                };
                let session = WatchSession::new(target, duration, &config.watch);
                let summary = watch_from_lines(BufReader::new(tokio::io::stdin()).lines(), session).await?;
                println!(
                    "Watched {}s, flushed {}s, completion eligible: {}",
                    summary.watched_seconds, summary.flushed_seconds, summary.completion_eligible
                );
            }
        },
    }
    Ok(())
}

/// Feed player commands (play, pause, hide, show, end, exit) from `lines` into a watch session.
/// The session always gets to flush, even when reading fails.
async fn watch_from_lines<R, S>(mut lines: Lines<R>, session: WatchSession<S>) -> anyhow::Result<WatchSummary>
where
    R: AsyncBufRead + Unpin,
    S: WatchTimeSink + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    let handle = tokio::spawn(session.run(rx));
    let read = forward_commands(&mut lines, &tx).await;
    drop(tx);
    let summary = handle.await??;
    read.context("Failed to read player commands")?;
    Ok(summary)
}

async fn forward_commands<R: AsyncBufRead + Unpin>(
    lines: &mut Lines<R>,
    tx: &mpsc::Sender<PlayerEvent>,
) -> std::io::Result<()> {
    while let Some(line) = lines.next_line().await? {
        let event = match line.trim() {
            "play" => PlayerEvent::Play,
            "pause" => PlayerEvent::Pause,
            "hide" => PlayerEvent::Visibility(false),
            "show" => PlayerEvent::Visibility(true),
            "end" => PlayerEvent::Ended,
            "exit" => PlayerEvent::Unmount,
            other => {
                println!("unknown command: {other}");
                continue;
            }
        };
        let stop = event == PlayerEvent::Unmount;
        if tx.send(event).await.is_err() || stop {
            break;
        }
    }
    Ok(())
}
