// SPDX-License-Identifier: Apache-2.0

//! Source line attribution.
//!
//! For task and play inputs the evaluator reports the line range of the
//! focal entity in its source YAML. Candidate blocks are the list items of
//! the file; when several mention the focal name or module, the one whose
//! text is closest (by edit distance) to a reconstructed YAML form of the
//! entity wins. Remaining ties resolve to the first candidate in source
//! order.

use serde::Serialize;

use crate::input::{Play, Task};

/// A line range in a source file (1-based, inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodeBlock {
    /// First line of the block.
    pub begin: usize,
    /// Last line of the block, when known.
    pub end: Option<usize>,
}

impl std::fmt::Display for CodeBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.end {
            Some(end) => write!(f, "L{}-{}", self.begin, end),
            None => write!(f, "L{}", self.begin),
        }
    }
}

/// One list-item block of a YAML file.
#[derive(Debug, Clone)]
struct Candidate {
    begin: usize,
    end: usize,
    text: String,
}

/// Splits a YAML body into list-item blocks: a block starts at a `- ` line
/// and runs to the line before the next `- ` line at the same or lower
/// indentation.
fn candidate_blocks(body: &str) -> Vec<Candidate> {
    let lines: Vec<&str> = body.lines().collect();
    let mut starts: Vec<(usize, usize)> = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("- ") || trimmed == "-" {
            let indent = line.len() - trimmed.len();
            starts.push((index, indent));
        }
    }

    let mut candidates = Vec::new();
    for (position, &(start, indent)) in starts.iter().enumerate() {
        // The block ends right before the next item at the same indent.
        let mut end = lines.len();
        for &(next_start, next_indent) in &starts[position + 1..] {
            if next_indent <= indent {
                end = next_start;
                break;
            }
        }
        // Trim trailing blank lines out of the block.
        while end > start + 1 && lines[end - 1].trim().is_empty() {
            end -= 1;
        }
        candidates.push(Candidate {
            begin: start + 1,
            end,
            text: lines[start..end].join("\n"),
        });
    }
    candidates
}

fn best_block(
    candidates: &[Candidate],
    mentions: &[&str],
    reconstructed: &str,
) -> Option<CodeBlock> {
    let mentioned: Vec<&Candidate> = candidates
        .iter()
        .filter(|candidate| {
            mentions
                .iter()
                .any(|needle| !needle.is_empty() && candidate.text.contains(needle))
        })
        .collect();
    let pool: &[&Candidate] = if mentioned.is_empty() {
        &[]
    } else {
        &mentioned
    };

    let mut best: Option<(usize, &Candidate)> = None;
    for &candidate in pool {
        let distance = strsim::levenshtein(&candidate.text, reconstructed);
        let better = match best {
            // A strict improvement is required, so ties keep the earlier
            // candidate in source order.
            Some((best_distance, _)) => distance < best_distance,
            None => true,
        };
        if better {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, candidate)| CodeBlock {
        begin: candidate.begin,
        end: Some(candidate.end),
    })
}

/// Finds the line block of a task in its source YAML.
#[must_use]
pub fn find_task_block(body: &str, task: &Task) -> Option<CodeBlock> {
    if body.is_empty() {
        return None;
    }
    let candidates = candidate_blocks(body);

    let module_short = task.module.rsplit('.').next().unwrap_or_default();
    let mentions: Vec<&str> = vec![task.name.as_str(), task.module.as_str(), module_short];

    let reconstructed = if task.yaml_lines.is_empty() {
        let mut block = task.options.clone();
        _ = block.insert(task.module.clone(), task.module_options.clone());
        serde_yaml::to_string(&vec![block]).unwrap_or_default()
    } else {
        task.yaml_lines.clone()
    };

    best_block(&candidates, &mentions, &reconstructed)
}

/// Finds the line block of a play in its source YAML.
#[must_use]
pub fn find_play_block(body: &str, play: &Play) -> Option<CodeBlock> {
    if body.is_empty() {
        return None;
    }
    let candidates = candidate_blocks(body);

    let hosts = play
        .options
        .get("hosts")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default();
    let mentions: Vec<&str> = vec![play.name.as_str(), hosts];

    let reconstructed = serde_yaml::to_string(&vec![play.options.clone()]).unwrap_or_default();

    best_block(&candidates, &mentions, &reconstructed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PLAYBOOK: &str = "---
- name: web play
  hosts: all
  tasks:
    - name: Install nginx
      ansible.builtin.package:
        name: nginx
        state: present

    - name: Install mysql
      ansible.builtin.package:
        name: mysql
        state: present
";

    fn task(name: &str, pkg: &str) -> Task {
        Task {
            r#type: "task".to_owned(),
            name: name.to_owned(),
            module: "ansible.builtin.package".to_owned(),
            yaml_lines: format!(
                "- name: {name}\n  ansible.builtin.package:\n    name: {pkg}\n    state: present\n"
            ),
            ..Task::default()
        }
    }

    #[test]
    fn test_task_blocks_are_ordered() {
        let first = find_task_block(PLAYBOOK, &task("Install nginx", "nginx")).expect("block");
        let second = find_task_block(PLAYBOOK, &task("Install mysql", "mysql")).expect("block");
        // Two tasks share a module: the second one's block must span lines
        // strictly greater than the first one's.
        assert!(second.begin > first.begin);
        assert_eq!(first.begin, 5);
        assert_eq!(second.begin, 10);
    }

    #[test]
    fn test_play_block() {
        let play = Play {
            r#type: "play".to_owned(),
            name: "web play".to_owned(),
            options: [
                ("name".to_owned(), json!("web play")),
                ("hosts".to_owned(), json!("all")),
            ]
            .into_iter()
            .collect(),
            ..Play::default()
        };
        let block = find_play_block(PLAYBOOK, &play).expect("block");
        assert_eq!(block.begin, 2);
    }

    #[test]
    fn test_no_match_returns_none() {
        let missing = task("Not in the file", "zsh");
        // Neither the name nor the module short name appears: no mention
        // pool, no block.
        let mut missing = missing;
        missing.module = "unknown.collection.module".to_owned();
        assert!(find_task_block("- name: Something else\n  shell: ls\n", &missing).is_none());
    }

    #[test]
    fn test_display_format() {
        let block = CodeBlock {
            begin: 4,
            end: Some(9),
        };
        assert_eq!(block.to_string(), "L4-9");
        let open = CodeBlock {
            begin: 4,
            end: None,
        };
        assert_eq!(open.to_string(), "L4");
    }
}
