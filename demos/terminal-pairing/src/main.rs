use calpair::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Logout confirmation over stdin
// ---------------------------------------------------------------------------

/// Hands each logout prompt to the input loop, which answers it with the
/// next line the user types.
struct PromptConfirm {
    prompts: mpsc::UnboundedSender<oneshot::Sender<bool>>,
}

impl ConfirmLogout for PromptConfirm {
    async fn confirm_logout(&self, identity: &Identity) -> bool {
        let (answer_tx, answer_rx) = oneshot::channel();
        if self.prompts.send(answer_tx).is_err() {
            return false;
        }
        println!("log out {identity}? [y/N]");
        answer_rx.await.unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(snapshot: &Snapshot) {
    match snapshot.state {
        SessionState::Unauthenticated => println!("not logged in (type `login`)"),
        SessionState::Bootstrapping | SessionState::AwaitingCode => {
            println!("starting session, waiting for a pairing code...")
        }
        SessionState::AwaitingScan => {
            if let Some(code) = &snapshot.pairing_code {
                println!("scan this code with your phone:\n\n    {code}\n");
            }
        }
        SessionState::Paired => println!("paired, you're all set"),
        SessionState::Failed => println!("could not start the session (type `login` to retry)"),
        SessionState::TimedOut => println!("no pairing code arrived (type `login` to retry)"),
    }
    if let Some(notice) = &snapshot.notice {
        println!("! {}", notice.message);
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // The address the login redirect landed on, e.g. `http://localhost/?identity=u1`.
    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://localhost/".to_string());
    let navigation = MemoryNavigation::parse(&address)?;

    let (prompts_tx, mut prompts) = mpsc::unbounded_channel();
    let confirm = PromptConfirm { prompts: prompts_tx };
    let handle = Orchestrator::from_config(ClientConfig::from_env(), confirm)?.start(navigation);

    let mut snapshots = handle.watch();
    render(&snapshots.borrow_and_update());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<oneshot::Sender<bool>> = None;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                render(&snapshots.borrow_and_update());
            }
            Some(answer) = prompts.recv() => pending = Some(answer),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if let Some(answer) = pending.take() {
                    let _ = answer.send(line.eq_ignore_ascii_case("y"));
                    continue;
                }
                match line {
                    "login" => match handle.login() {
                        Some(url) => println!("open {url} to log in"),
                        None => println!("backend is not configured"),
                    },
                    "logout" => handle.logout(),
                    "quit" | "exit" => break,
                    "" => {}
                    other => println!("unknown command {other:?} (login, logout, quit)"),
                }
            }
        }
    }

    handle.stop().await;
    Ok(())
}
