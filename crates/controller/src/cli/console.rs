//! `lumina console`: interactive admin shell client.
//!
//! Connects to the controller's node port, switches the connection into
//! shell mode and relays readline input.  Each request is answered by zero
//! or more listing lines followed by one `SUCCESS:` or `FAILED:` line.

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;

use crate::admin::SHELL_PREFIX;

/// Lines of one framed reply, terminator included.
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Framed(Vec<String>),
    /// The controller closed the connection first.
    Closed(Vec<String>),
}

/// A line that ends a reply.
pub fn is_terminator(line: &str) -> bool {
    line.starts_with("SUCCESS:") || line.starts_with("FAILED:")
}

/// Read lines up to and including the next terminator.
pub async fn read_reply<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>) -> anyhow::Result<Reply> {
    let mut out = Vec::new();
    loop {
        match lines.next_line().await.context("reading from controller")? {
            Some(line) => {
                let done = is_terminator(&line);
                out.push(line);
                if done {
                    return Ok(Reply::Framed(out));
                }
            }
            None => return Ok(Reply::Closed(out)),
        }
    }
}

/// Run the interactive console against `addr`.
pub async fn console(addr: &str) -> anyhow::Result<()> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("connecting to {addr}"))?;
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    write
        .write_all(format!("{SHELL_PREFIX}\n").as_bytes())
        .await
        .context("opening shell")?;
    if !print_reply(read_reply(&mut lines).await?) {
        return Ok(());
    }

    let history_path = std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_default()
        .join(".lumina_history");
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    loop {
        let input = match rl.readline("lumina> ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => {
                let _ = write.write_all(b"exit\n").await;
                break;
            }
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        rl.add_history_entry(input).ok();

        write
            .write_all(format!("{input}\n").as_bytes())
            .await
            .context("sending request")?;
        if !print_reply(read_reply(&mut lines).await?) {
            break;
        }
        if input == "exit" {
            break;
        }
    }

    rl.save_history(&history_path).ok();
    Ok(())
}

/// Print a reply; `false` once the connection is gone.
fn print_reply(reply: Reply) -> bool {
    match reply {
        Reply::Framed(lines) => {
            for line in lines {
                if line.starts_with("FAILED:") {
                    println!("\x1B[31m{line}\x1B[0m");
                } else {
                    println!("{line}");
                }
            }
            true
        }
        Reply::Closed(lines) => {
            for line in lines {
                println!("{line}");
            }
            eprintln!("connection closed by controller");
            false
        }
    }
}
