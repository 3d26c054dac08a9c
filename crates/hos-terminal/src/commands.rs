use chrono::Local;

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

// Fixed command table behind the dashboard terminal. Everything here is
// string formatting over fixtures; live data stays on the HTTP surface.
pub fn dispatch(line: &str) -> String {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else {
        return String::new();
    };
    let args: Vec<&str> = parts.collect();

    match command {
        "help" => help().to_string(),
        "clear" => String::new(),
        "version" => version().to_string(),
        "stats" => stats().to_string(),
        "patients" => patients(&args),
        "agents" => agents(&args),
        "logs" => logs(&args),
        "theme" => theme(&args),
        "exit" => format!("{YELLOW}Use Ctrl+C to interrupt current operation{RESET}"),
        other => format!(
            "{RED}Command not found: {other}{RESET}\nType \"help\" for available commands."
        ),
    }
}

fn help() -> &'static str {
    "Available commands:
  help              - Show this help message
  clear             - Clear the terminal screen (Ctrl+L)
  stats             - Display system statistics
  patients [list|search <term>] - Manage patients
  agents [list|run <type>] - Manage AI agents
  logs [tail|clear] - View system logs
  theme [dark|light|auto] - Change theme
  version           - Show version information
  exit              - Close terminal"
}

fn version() -> &'static str {
    "HealthOS Dashboard v1.0.0
Terminal powered by xterm.js"
}

fn stats() -> &'static str {
    "System Statistics:
  Total Patients: 47
  Active Sessions: 12
  Processing Jobs: 3
  System Status: healthy"
}

fn patients(args: &[&str]) -> String {
    match args.first() {
        None | Some(&"list") => "Patients (3):
  1. João Silva - ATIVO (ID: pt-001)
  2. Maria Santos - EM OBS (ID: pt-002)
  3. Pedro Costa - INATIVO (ID: pt-003)"
            .to_string(),
        Some(&"search") => {
            let term = args[1..].join(" ");
            if term.is_empty() {
                return format!("{YELLOW}Usage: patients search <term>{RESET}");
            }
            format!("Searching for: \"{term}\"...\nNo results found.")
        }
        Some(other) => format!(
            "{YELLOW}Unknown subcommand: {other}\nUsage: patients [list|search <term>]{RESET}"
        ),
    }
}

fn agents(args: &[&str]) -> String {
    match args.first() {
        None | Some(&"list") => "Available AI Agents:
  1. transcribe - Audio transcription (ElevenLabs)
  2. process    - Document processing
  3. asl        - ASL Linguistic Analysis
  4. dim        - Dimensional Analysis
  5. gem        - GEM Profiling
  6. anon       - Anonymization

Use: agents run <type> to execute"
            .to_string(),
        Some(&"run") => {
            let Some(agent_type) = args.get(1) else {
                return format!("{YELLOW}Usage: agents run <type>{RESET}");
            };
            format!(
                "{GREEN}Agent \"{agent_type}\" started successfully{RESET}\nJob ID: job-{}",
                Local::now().timestamp_millis()
            )
        }
        Some(other) => format!(
            "{YELLOW}Unknown subcommand: {other}\nUsage: agents [list|run <type>]{RESET}"
        ),
    }
}

fn logs(args: &[&str]) -> String {
    match args.first() {
        None | Some(&"tail") => {
            let stamp = Local::now().format("%H:%M:%S");
            format!(
                "Recent Logs:
  [{stamp}] System initialized
  [{stamp}] Terminal session started
  [{stamp}] Waiting for commands..."
            )
        }
        Some(&"clear") => format!("{GREEN}Logs cleared{RESET}"),
        Some(other) => {
            format!("{YELLOW}Unknown subcommand: {other}\nUsage: logs [tail|clear]{RESET}")
        }
    }
}

fn theme(args: &[&str]) -> String {
    let Some(theme) = args.first() else {
        return format!("{YELLOW}Usage: theme [dark|light|auto]{RESET}");
    };
    match *theme {
        "dark" | "light" | "auto" => format!("{GREEN}Theme changed to: {theme}{RESET}"),
        other => format!("{RED}Invalid theme: {other}{RESET}\nValid options: dark, light, auto"),
    }
}
