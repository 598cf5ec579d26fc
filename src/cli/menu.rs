use std::sync::atomic::AtomicBool;

use anyhow::Result;
use lan_messenger::constants::RECENT_LOG_ENTRIES;
use lan_messenger::{LogEntry, Node, NodeStatus, PeerView, SendReport};

use super::{clear_screen, prompt, InputLines};

const MENU: &str = "\
=== LAN Messenger ===
1. Send message
2. List active peers
3. Show message log
4. Status
5. Refresh discovery
6. Clear screen
7. Quit";

/// Interactive loop. Returns on quit, EOF or signal.
pub fn run(node: &Node, interrupted: &AtomicBool) -> Result<()> {
    let input = InputLines::stdin()?;

    println!("Listening on {} (discovery port {})", node.identity(), node.discovery_addr().port());
    println!();
    println!("{}", MENU);

    loop {
        prompt("\nChoose an option (1-7): ")?;
        let Some(choice) = input.next_line(interrupted) else { break };

        match choice.trim() {
            "1" => {
                let peers = node.deliverable_count();
                if peers == 0 {
                    println!("No active peers to send to. Wait for discovery.");
                    continue;
                }
                println!("Active peers: {}", peers);
                prompt("Message (or 'cancel' to go back): ")?;
                let Some(line) = input.next_line(interrupted) else { break };
                match SendInput::parse(&line) {
                    SendInput::Cancel => println!("Send cancelled."),
                    SendInput::Empty => println!("Message cannot be empty."),
                    SendInput::Text(text) => match node.send_to_peers(text) {
                        Ok(report) => println!("{}", render_report(&report)),
                        Err(e) => println!("Send failed: {}", e),
                    },
                }
            }
            "2" => println!("{}", render_peers(&node.list_active_peers())),
            "3" => {
                let status = node.status();
                println!("{}", render_log(&node.recent_log(RECENT_LOG_ENTRIES), status.log_size));
            }
            "4" => println!("{}", render_status(&node.status())),
            "5" => {
                let sent = node.refresh_discovery();
                println!("Discovery announcement sent ({} target(s)).", sent);
            }
            "6" => {
                clear_screen()?;
                println!("{}", MENU);
            }
            "7" | "q" | "quit" => break,
            "" => {}
            other => println!("Unknown option '{}'. Choose 1-7.", other),
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq)]
enum SendInput<'a> {
    Cancel,
    Empty,
    Text(&'a str),
}

impl<'a> SendInput<'a> {
    fn parse(line: &'a str) -> Self {
        let text = line.trim();
        if text.is_empty() {
            Self::Empty
        } else if text.eq_ignore_ascii_case("cancel") {
            Self::Cancel
        } else {
            Self::Text(text)
        }
    }
}

fn render_report(report: &SendReport) -> String {
    if report.no_active_peers() {
        return "No active peers to send to.".to_string();
    }
    let mut out = format!("Sent to {}/{} peer(s).", report.sent, report.attempted);
    for (peer, outcome) in &report.failed {
        out.push_str(&format!("\n  {} unreachable ({})", peer, outcome));
    }
    out
}

fn render_peers(peers: &[PeerView]) -> String {
    if peers.is_empty() {
        return "No active peers.".to_string();
    }
    let mut out = format!("Active peers ({}):", peers.len());
    for view in peers {
        out.push_str(&format!(
            "\n  {:<24} {:<7} {}s ago",
            view.address.to_string(),
            view.freshness.to_string(),
            view.age.as_secs()
        ));
    }
    out
}

fn render_log(entries: &[LogEntry], total: usize) -> String {
    if entries.is_empty() {
        return "No messages yet.".to_string();
    }
    let mut out = format!("Last {} of {} message(s):", entries.len(), total);
    for entry in entries {
        out.push_str(&format!("\n  {}", entry));
    }
    out
}

fn render_status(status: &NodeStatus) -> String {
    [
        "Node Status".to_string(),
        "===========".to_string(),
        format!("Address:        {}", status.self_address),
        format!("Discovery port: {}", status.discovery_port),
        format!("Running:        {}", if status.running { "yes" } else { "no" }),
        format!("Active peers:   {:>5}", status.active_count),
        format!("Known peers:    {:>5}", status.total_known),
        format!("Messages:       {:>5}", status.log_size),
    ]
    .join("\n")
}
