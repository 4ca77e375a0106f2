//! Single-query and interactive modes.

use futures::StreamExt;
use isbot_core::{Answer, IsbotConfig, Message, RagPipeline, TurnRequest, TurnResponse};
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

const PROMPT: &str = "Zadejte dotaz nebo 'q' pro ukončení: ";

/// Answer one query. A failed turn maps to a non-zero exit code.
pub async fn run_single_query(query: &str, config: IsbotConfig) -> anyhow::Result<ExitCode> {
    let pipeline = RagPipeline::from_config(config)?;
    let response = pipeline.handle_turn(TurnRequest::new(query)).await;
    Ok(match print_response(response).await? {
        Some(_) => ExitCode::SUCCESS,
        None => ExitCode::FAILURE,
    })
}

/// Read queries until `q` or end of input, keeping the verbatim history.
pub async fn run_interactive(config: IsbotConfig, quiet: bool) -> anyhow::Result<()> {
    if !quiet {
        println!(
            "  ISbot | Model: {} | Index: {}",
            config.llm.model, config.index.provider
        );
    }
    let pipeline = RagPipeline::from_config(config)?;
    let mut history: Vec<Message> = Vec::new();

    let stdin = io::stdin();
    loop {
        print!("{}", PROMPT);
        io::stdout().flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }
        let query = input.trim();
        if is_quit(query) {
            break;
        }
        if query.is_empty() {
            continue;
        }

        let request = TurnRequest::new(query).with_history(history.clone());
        let response = pipeline.handle_turn(request).await;
        if let Some(answer) = print_response(response).await? {
            history.push(Message::user(query));
            history.push(Message::assistant(answer));
        }
    }
    Ok(())
}

fn is_quit(input: &str) -> bool {
    input.eq_ignore_ascii_case("q")
}

/// Print an answer (streaming it when possible) and the feedback link.
///
/// Returns the full answer text, or `None` for a failed turn.
async fn print_response(response: TurnResponse) -> anyhow::Result<Option<String>> {
    let answer = match response.answer {
        Answer::Text(text) => {
            println!("{}", text);
            text
        }
        Answer::Error(message) => {
            eprintln!("{}", message);
            return Ok(None);
        }
        Answer::Stream(mut stream) => {
            let mut text = String::new();
            let mut stdout = io::stdout();
            while let Some(fragment) = stream.next().await {
                match fragment {
                    Ok(fragment) => {
                        write!(stdout, "{}", fragment)?;
                        stdout.flush()?;
                        text.push_str(&fragment);
                    }
                    Err(e) => {
                        println!();
                        eprintln!("Error: {}", e);
                        return Ok(None);
                    }
                }
            }
            println!();
            text
        }
    };
    if let Some(link) = response.feedback_link {
        println!("\nZpětná vazba k této odpovědi: {}", link);
    }
    Ok(Some(answer))
}
