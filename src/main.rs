//! Terminal driver: a CLI stand-in for the GUI `Phone` would normally talk
//! to. Spawns the engine on its own thread and relays typed commands into
//! the mailbox, printing state changes and call-history log lines as they
//! arrive (`Phone.h`'s `UpdateHandler` contract).

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

use voicelink::audio::RealAudioDevice;
use voicelink::codec::OpusCodecFactory;
use voicelink::config::{PORT_DEFAULT, PORT_MAX};
use voicelink::logging;
use voicelink::mailbox::Mailbox;
use voicelink::router::IgdRouterClient;
use voicelink::state::Command;
use voicelink::transport::RealSocket;
use voicelink::Engine;

#[derive(Debug, Parser)]
#[command(name = "voicelink", about = "Peer-to-peer VoIP softphone")]
struct Cli {
    /// Bind exactly this UDP port instead of searching PORT_DEFAULT..=PORT_MAX.
    #[arg(long)]
    local_port: Option<u16>,

    /// Write logs to this file instead of stderr.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Skip UPnP/IGD router discovery entirely.
    #[arg(long)]
    no_router: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.log_file.as_deref());

    let mailbox = Mailbox::new();

    let (port_start, port_max) = match cli.local_port {
        Some(port) => (port, port),
        None => (PORT_DEFAULT, PORT_MAX),
    };
    let transport =
        RealSocket::bind_range(port_start, port_max).context("binding local UDP port")?;

    let router: Option<Box<dyn voicelink::router::RouterClient>> = if cli.no_router {
        None
    } else {
        Some(Box::new(IgdRouterClient::new()))
    };

    let engine = Engine::new(
        Box::new(transport),
        Box::new(RealAudioDevice::new()),
        Box::new(OpusCodecFactory),
        router,
        mailbox.clone(),
    );

    let wakeup = Arc::new((Mutex::new(false), Condvar::new()));
    let wakeup_writer = wakeup.clone();
    mailbox.set_update_handler(move || {
        let (lock, cvar) = &*wakeup_writer;
        *lock.lock().unwrap() = true;
        cvar.notify_one();
    });

    let engine_thread = thread::spawn(move || engine.main_loop());

    let printer_mailbox = mailbox.clone();
    let printer_wakeup = wakeup.clone();
    let printer = thread::spawn(move || {
        loop {
            let (lock, cvar) = &*printer_wakeup;
            let mut woken = lock.lock().unwrap();
            while !*woken {
                woken = cvar.wait(woken).unwrap();
            }
            *woken = false;
            drop(woken);

            for line in printer_mailbox.drain_log() {
                println!("{line}");
            }
            let state = printer_mailbox.state();
            println!("[state: {state:?}]");
            if state.is_terminal() {
                if let Some(message) = printer_mailbox.error_message() {
                    eprintln!("error: {message}");
                }
                break;
            }
        }
    });

    println!("Commands: call <host[:port]> | answer | hangup | exit");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        let command = parse_terminal_command(&line);
        let is_exit = matches!(command, Command::Exit);
        mailbox.set_command(command);
        if is_exit || mailbox.state().is_terminal() {
            break;
        }
    }

    let _ = engine_thread.join();
    let _ = printer.join();
    Ok(())
}

fn parse_terminal_command(line: &str) -> Command {
    let line = line.trim();
    let mut parts = line.splitn(2, char::is_whitespace);
    match parts.next().unwrap_or("").to_ascii_lowercase().as_str() {
        "call" | "dial" => Command::Call(parts.next().unwrap_or("").trim().to_string()),
        "answer" => Command::Answer,
        "hangup" => Command::Hangup,
        "exit" | "quit" => Command::Exit,
        _ => Command::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_with_argument() {
        assert_eq!(
            parse_terminal_command("call 10.0.0.2:4000"),
            Command::Call("10.0.0.2:4000".to_string())
        );
    }

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_terminal_command("answer"), Command::Answer);
        assert_eq!(parse_terminal_command("hangup"), Command::Hangup);
        assert_eq!(parse_terminal_command("exit"), Command::Exit);
    }

    #[test]
    fn unrecognized_input_is_none() {
        assert_eq!(parse_terminal_command("gibberish"), Command::None);
    }
}
