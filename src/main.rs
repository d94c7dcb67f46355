use anyhow::Context;
use socratic_tutor::audio::{
    AudioError, AudioOutput, PlaybackState, RodioOutput, SpeechPlayer, WavFileOutput,
};
use socratic_tutor::config::{TutorConfig, load_dotenv};
use socratic_tutor::gateway::{GeminiGateway, PROMPT_SUGGESTIONS};
use socratic_tutor::practice::{PRACTICE_TOPICS, find_problem, topic_progress};
use socratic_tutor::render::render_transcript;
use socratic_tutor::share::{copy_to_clipboard, share_text};
use socratic_tutor::store::FileStore;
use socratic_tutor::{ChatTurn, ImageData, PendingReply, ReplyOutcome, Tutor, TutorError, View};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

const HELP: &str = "\
Type a message to answer the tutor. Commands:
  /image <path>      start from a photo of a problem
  /practice          browse practice problems
  /problem <id>      start a practice problem
  /back              leave the practice browser
  /suggest <1-3>     send a quick prompt
  /think             toggle extended reasoning
  /save              save this session
  /sessions          list saved sessions
  /load <id>         load a saved session
  /delete <id>       delete a saved session
  /new               start a new chat
  /speak <n>         play or stop tutor turn n
  /stop              stop all speech
  /share <n>         copy tutor turn n to the clipboard
  /export <path>     write the conversation as HTML
  /dismiss           dismiss the current error
  /quit              exit";

type SpeechResult = (usize, Result<PlaybackState, AudioError>);

enum Pending {
    NewSession,
    Delete(String),
}

#[derive(PartialEq)]
enum Flow {
    Continue,
    Quit,
}

struct Shell {
    tutor: Tutor,
    player: SpeechPlayer,
    /// Set when speech is written to files instead of played.
    speech_dir: Option<String>,
    replies: mpsc::UnboundedSender<ReplyOutcome>,
    speech: mpsc::UnboundedSender<SpeechResult>,
    confirm: Option<Pending>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = load_dotenv();
    let config = TutorConfig::from_env()?;

    let level = config
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
    match dotenv {
        Ok(Some(path)) => tracing::debug!(path = %path.display(), "loaded .env"),
        Ok(None) => {}
        Err(err) => tracing::warn!(error = %err, "ignoring unreadable .env"),
    }

    let store_dir = config.data_dir.join("store");
    std::fs::create_dir_all(&store_dir)
        .with_context(|| format!("creating data directory {}", store_dir.display()))?;
    let speech_dir = config.data_dir.join("speech");

    let gateway = Arc::new(GeminiGateway::new(config.gateway));
    let store = Arc::new(FileStore::new(store_dir));
    let (output, speech_dir): (Arc<dyn AudioOutput>, Option<String>) =
        match RodioOutput::open_default() {
            Ok(device) => (Arc::new(device), None),
            Err(err) => {
                tracing::warn!(error = %err, "no sound device; writing speech to files");
                (
                    Arc::new(WavFileOutput::new(&speech_dir)),
                    Some(speech_dir.display().to_string()),
                )
            }
        };

    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    let (speech_tx, mut speech_rx) = mpsc::unbounded_channel();
    let mut shell = Shell {
        tutor: Tutor::new(gateway.clone(), store),
        player: SpeechPlayer::new(gateway, output),
        speech_dir,
        replies: reply_tx,
        speech: speech_tx,
        confirm: None,
    };

    println!("Socratic Math Tutor. Type /help for commands.");
    shell.show_view();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if shell.handle_line(line.trim()).await == Flow::Quit {
                    break;
                }
            }
            Some(outcome) = reply_rx.recv() => shell.apply_reply(outcome),
            Some((turn, result)) = speech_rx.recv() => shell.apply_speech(turn, result),
            _ = ticker.tick() => shell.tutor.expire_notices(Instant::now()),
        }
    }

    shell.player.stop_all();
    Ok(())
}

impl Shell {
    async fn handle_line(&mut self, line: &str) -> Flow {
        if let Some(pending) = self.confirm.take() {
            let yes = matches!(line.to_ascii_lowercase().as_str(), "y" | "yes");
            self.resolve_confirmation(pending, yes);
            return Flow::Continue;
        }
        if line.is_empty() {
            return Flow::Continue;
        }

        let Some(command) = line.strip_prefix('/') else {
            self.submit(line);
            return Flow::Continue;
        };
        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map(|(name, arg)| (name, arg.trim()))
            .unwrap_or((command, ""));

        match name {
            "help" => println!("{HELP}"),
            "quit" | "exit" => return Flow::Quit,
            "image" => self.begin_from_image(arg).await,
            "practice" => {
                if self.tutor.open_practice_browser() {
                    self.show_practice();
                } else {
                    println!("Practice problems are available from the welcome screen.");
                }
            }
            "problem" => self.begin_problem(arg),
            "back" => {
                if self.tutor.back_to_welcome() {
                    self.show_view();
                }
            }
            "suggest" => match arg.parse::<usize>().ok().and_then(|n| n.checked_sub(1)) {
                Some(index) if index < PROMPT_SUGGESTIONS.len() => {
                    println!("You: {}", PROMPT_SUGGESTIONS[index]);
                    self.submit(PROMPT_SUGGESTIONS[index]);
                }
                _ => {
                    for (i, prompt) in PROMPT_SUGGESTIONS.iter().enumerate() {
                        println!("  {}. {prompt}", i + 1);
                    }
                }
            },
            "think" => {
                let enabled = self.tutor.toggle_extended_reasoning();
                println!(
                    "Extended reasoning {}.",
                    if enabled { "on" } else { "off" }
                );
            }
            "save" => match self.tutor.save_session() {
                Ok(saved) => println!("Session saved as \"{}\" ({}).", saved.name(), saved.id()),
                Err(err) => println!("! {err}"),
            },
            "sessions" => self.list_sessions(),
            "load" => match self.tutor.load_session(arg) {
                Ok(()) => {
                    self.player.stop_all();
                    self.show_transcript();
                }
                Err(err) => println!("! {err}"),
            },
            "delete" => match self.tutor.registry().get(arg) {
                Some(session) => {
                    println!("Delete \"{}\"? [y/N]", session.name());
                    self.confirm = Some(Pending::Delete(arg.to_string()));
                }
                None => {
                    if let Err(err) = self.tutor.delete_session(arg, |_| true) {
                        println!("! {err}");
                    }
                }
            },
            "new" => {
                if self.tutor.turns().is_empty() {
                    self.resolve_confirmation(Pending::NewSession, true);
                } else {
                    println!("Start a new chat? The current conversation will be lost. [y/N]");
                    self.confirm = Some(Pending::NewSession);
                }
            }
            "speak" => self.speak(arg),
            "stop" => self.player.stop_all(),
            "share" => self.share(arg),
            "export" => self.export(arg).await,
            "dismiss" => self.tutor.dismiss_error(),
            other => println!("Unknown command /{other}. Type /help."),
        }
        Flow::Continue
    }

    fn resolve_confirmation(&mut self, pending: Pending, yes: bool) {
        match pending {
            Pending::NewSession => {
                if self.tutor.start_new_session(|| yes) {
                    self.player.stop_all();
                    self.show_view();
                }
            }
            Pending::Delete(id) => match self.tutor.delete_session(&id, |_| yes) {
                Ok(true) => println!("Deleted."),
                Ok(false) => {}
                Err(err) => println!("! {err}"),
            },
        }
    }

    fn submit(&mut self, text: &str) {
        match self.tutor.submit_message(text) {
            Some(pending) => self.dispatch(pending),
            None if self.tutor.is_pending() => println!("The tutor is still thinking..."),
            None => {}
        }
    }

    async fn begin_from_image(&mut self, path: &str) {
        if path.is_empty() {
            println!("Usage: /image <path>");
            return;
        }
        let image = match ImageData::read_file(Path::new(path)).await {
            Ok(image) => image,
            Err(err) => {
                println!("! Could not read the photo: {err}");
                return;
            }
        };
        match self.tutor.begin_from_image(image) {
            Some(pending) => {
                println!("You: [photo]");
                self.dispatch(pending);
            }
            None => println!("Start a new chat (/new) before uploading another problem."),
        }
    }

    fn begin_problem(&mut self, id: &str) {
        let Some(problem) = find_problem(id) else {
            println!("No practice problem '{id}'. Type /practice to browse.");
            return;
        };
        match self.tutor.begin_practice(problem) {
            Some(pending) => {
                println!("You: {}", self.tutor.turns()[0].text());
                self.dispatch(pending);
            }
            None => println!("Start a new chat (/new) before picking another problem."),
        }
    }

    fn dispatch(&self, pending: PendingReply) {
        if pending.mode().is_extended() {
            println!("Tutor is thinking deeply...");
        } else {
            println!("Tutor is thinking...");
        }
        let replies = self.replies.clone();
        tokio::spawn(async move {
            let _ = replies.send(pending.resolve().await);
        });
    }

    fn apply_reply(&mut self, outcome: ReplyOutcome) {
        let succeeded = outcome.result.is_ok();
        if !self.tutor.complete_reply(outcome) {
            return;
        }
        if succeeded {
            if let Some(turn) = self.tutor.turns().last() {
                print_turn(self.tutor.turns().len(), turn);
            }
        } else if let Some(err) = self.tutor.last_error() {
            println!("! {err}");
        }
    }

    fn speak(&mut self, arg: &str) {
        let Some((index, turn)) = self.tutor_turn(arg) else {
            return;
        };
        let text = turn.text().to_string();
        if self.player.state(index) == PlaybackState::Idle {
            println!("Generating audio...");
        }
        let player = self.player.clone();
        let speech = self.speech.clone();
        tokio::spawn(async move {
            let result = player.press(index, &text).await;
            let _ = speech.send((index, result));
        });
    }

    fn apply_speech(&mut self, turn: usize, result: Result<PlaybackState, AudioError>) {
        match result {
            Ok(PlaybackState::Playing) => match &self.speech_dir {
                Some(dir) => println!("Playing turn {} (audio in {dir}).", turn + 1),
                None => println!("Playing turn {}.", turn + 1),
            },
            Ok(PlaybackState::Idle) => println!("Stopped turn {}.", turn + 1),
            Ok(PlaybackState::Fetching) => {}
            Err(err) => {
                let err = TutorError::from(err);
                println!("! {err}");
                self.tutor.raise(err);
            }
        }
    }

    fn share(&self, arg: &str) {
        let Some((_, turn)) = self.tutor_turn(arg) else {
            return;
        };
        match copy_to_clipboard(turn) {
            Ok(_) => println!("Copied to clipboard."),
            Err(err) => {
                println!("! {err}");
                if let Some(text) = share_text(turn) {
                    println!("{text}");
                }
            }
        }
    }

    async fn export(&self, path: &str) {
        if path.is_empty() {
            println!("Usage: /export <path>");
            return;
        }
        if self.tutor.turns().is_empty() {
            println!("Nothing to export yet.");
            return;
        }
        let html = render_transcript("Socratic Math Tutor", self.tutor.turns());
        match tokio::fs::write(path, html).await {
            Ok(()) => println!("Wrote {path}."),
            Err(err) => println!("! Could not write {path}: {err}"),
        }
    }

    /// Resolves a 1-based transcript number to a tutor turn.
    fn tutor_turn(&self, arg: &str) -> Option<(usize, &ChatTurn)> {
        let index = arg.parse::<usize>().ok().and_then(|n| n.checked_sub(1));
        match index.and_then(|i| self.tutor.turns().get(i).map(|turn| (i, turn))) {
            Some((i, turn)) if !turn.is_user() => Some((i, turn)),
            _ => {
                println!("Turn '{arg}' is not a tutor reply.");
                None
            }
        }
    }

    fn list_sessions(&self) {
        let sessions = self.tutor.registry().list();
        if sessions.is_empty() {
            println!("No saved sessions.");
            return;
        }
        for session in sessions {
            println!(
                "  {}  {}  ({} turns)",
                session.id(),
                session.name(),
                session.turns().len()
            );
        }
    }

    fn show_view(&self) {
        match self.tutor.view() {
            View::Welcome => println!(
                "Upload a photo of a math problem (/image <path>) or practice with /practice."
            ),
            View::PracticeBrowser => self.show_practice(),
            View::Chat => self.show_transcript(),
        }
    }

    fn show_practice(&self) {
        for topic in PRACTICE_TOPICS {
            let progress = topic_progress(topic, self.tutor.completions());
            println!(
                "{} - {} [{}/{} done, {:.0}%]",
                topic.title,
                topic.description,
                progress.completed,
                progress.total,
                progress.percent()
            );
            for problem in topic.problems {
                let mark = if self.tutor.completions().is_complete(problem.id) {
                    "x"
                } else {
                    " "
                };
                println!("  [{mark}] {:<9} {}: {}", problem.id, problem.title, problem.problem);
            }
        }
        println!("Start one with /problem <id>, or /back.");
    }

    fn show_transcript(&self) {
        for (i, turn) in self.tutor.turns().iter().enumerate() {
            print_turn(i + 1, turn);
        }
    }
}

fn print_turn(number: usize, turn: &ChatTurn) {
    if turn.is_user() {
        match turn.image() {
            Some(image) if turn.text().is_empty() => {
                println!("[{number}] You: [photo, {}]", image.mime_type())
            }
            _ => println!("[{number}] You: {}", turn.text()),
        }
    } else {
        let marker = if turn.extended_reasoning() == Some(true) {
            " (extended reasoning)"
        } else {
            ""
        };
        println!("[{number}] Tutor{marker}: {}", turn.text());
    }
}
