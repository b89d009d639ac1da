/// Console commands, autocomplete and parsing

#[derive(Debug, Clone)]
pub struct Command {
  pub name: &'static str,
  pub aliases: &'static [&'static str],
  pub usage: &'static str,
  pub description: &'static str,
}

/// All available commands
pub const COMMANDS: &[Command] = &[
  Command {
    name: "send",
    aliases: &["s", "msg"],
    usage: "send <message>",
    description: "Send a message, queueing it if delivery fails",
  },
  Command {
    name: "sync",
    aliases: &["force", "f"],
    usage: "sync",
    description: "Force a background sync now",
  },
  Command {
    name: "pending",
    aliases: &["p", "check", "queue"],
    usage: "pending",
    description: "List queued messages",
  },
  Command {
    name: "visible",
    aliases: &["fg", "foreground"],
    usage: "visible",
    description: "Bring the agent to the foreground",
  },
  Command {
    name: "hidden",
    aliases: &["bg", "background"],
    usage: "hidden",
    description: "Send the agent to the background",
  },
  Command {
    name: "online",
    aliases: &["on"],
    usage: "online",
    description: "Pin the network state to online",
  },
  Command {
    name: "offline",
    aliases: &["off"],
    usage: "offline",
    description: "Pin the network state to offline",
  },
  Command {
    name: "auto",
    aliases: &["probe"],
    usage: "auto",
    description: "Go back to probing the network",
  },
  Command {
    name: "fetch",
    aliases: &["get"],
    usage: "fetch <url>",
    description: "Route a GET request through the cache",
  },
  Command {
    name: "open",
    aliases: &["nav", "navigate"],
    usage: "open <url>",
    description: "Route a page navigation",
  },
  Command {
    name: "status",
    aliases: &["st"],
    usage: "status",
    description: "Show network, sync and cache state",
  },
  Command {
    name: "help",
    aliases: &["h", "?"],
    usage: "help",
    description: "List commands",
  },
  Command {
    name: "quit",
    aliases: &["q", "exit"],
    usage: "quit",
    description: "Exit postlane",
  },
];

/// A parsed console line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
  Send(String),
  Sync,
  Pending,
  Visible,
  Hidden,
  Online,
  Offline,
  Auto,
  Fetch(String),
  Open(String),
  Status,
  Help,
  Quit,
}

/// Get autocomplete suggestions for a given input
pub fn get_suggestions(input: &str) -> Vec<&'static Command> {
  let input_lower = input.to_lowercase();

  if input_lower.is_empty() {
    return COMMANDS.iter().collect();
  }

  let mut matches: Vec<(&Command, u32)> = Vec::new();

  for cmd in COMMANDS {
    // Exact match on name
    if cmd.name == input_lower {
      matches.push((cmd, 0)); // Highest priority
      continue;
    }

    // Exact match on alias
    if cmd.aliases.contains(&input_lower.as_str()) {
      matches.push((cmd, 1));
      continue;
    }

    // Prefix match on name
    if cmd.name.starts_with(&input_lower) {
      matches.push((cmd, 2));
      continue;
    }

    // Prefix match on alias
    if cmd.aliases.iter().any(|a| a.starts_with(&input_lower)) {
      matches.push((cmd, 3));
      continue;
    }

    // Fuzzy match (contains)
    if cmd.name.contains(&input_lower) {
      matches.push((cmd, 4));
      continue;
    }

    // Fuzzy match on alias
    if cmd.aliases.iter().any(|a| a.contains(&input_lower)) {
      matches.push((cmd, 5));
    }
  }

  // Sort by priority
  matches.sort_by_key(|(_, priority)| *priority);

  matches.into_iter().map(|(cmd, _)| cmd).collect()
}

/// Best command for a typed word. Fuzzy matches are only suggestions and
/// never execute.
fn resolve(word: &str) -> Option<&'static Command> {
  let word = word.to_lowercase();
  get_suggestions(&word)
    .into_iter()
    .find(|cmd| cmd.name.starts_with(&word) || cmd.aliases.iter().any(|a| a.starts_with(&word)))
}

/// Parse a console line. Returns `Ok(None)` for a blank line.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
  let line = line.trim();
  if line.is_empty() {
    return Ok(None);
  }

  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };

  let cmd = resolve(word).ok_or_else(|| {
    let hints: Vec<_> = get_suggestions(word).iter().map(|c| c.name).collect();
    if hints.is_empty() {
      format!("Unknown command: {} (try `help`)", word)
    } else {
      format!("Unknown command: {} (did you mean {}?)", word, hints.join(", "))
    }
  })?;

  let argument = |what: &str| {
    if rest.is_empty() {
      Err(format!("Usage: {} ({} required)", cmd.usage, what))
    } else {
      Ok(rest.to_string())
    }
  };

  let parsed = match cmd.name {
    "send" => ConsoleCommand::Send(argument("message")?),
    "sync" => ConsoleCommand::Sync,
    "pending" => ConsoleCommand::Pending,
    "visible" => ConsoleCommand::Visible,
    "hidden" => ConsoleCommand::Hidden,
    "online" => ConsoleCommand::Online,
    "offline" => ConsoleCommand::Offline,
    "auto" => ConsoleCommand::Auto,
    "fetch" => ConsoleCommand::Fetch(argument("url")?),
    "open" => ConsoleCommand::Open(argument("url")?),
    "status" => ConsoleCommand::Status,
    "help" => ConsoleCommand::Help,
    _ => ConsoleCommand::Quit,
  };
  Ok(Some(parsed))
}
