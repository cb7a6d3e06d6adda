//! Status command implementation

use colored::Colorize;
use fleet_core::{EntityStatus, display_version};

const HEADERS: [&str; 5] = ["Name", "Installed", "Available", "Behind", "State"];

fn state(row: &EntityStatus) -> &'static str {
    if row.pending_removal {
        "to be removed"
    } else if row.unfinished {
        "unfinished"
    } else if !row.installed {
        "not installed"
    } else if row.current_version != row.remote_version {
        "update available"
    } else {
        "up to date"
    }
}

/// Plain cells of one row.
fn cells(row: &EntityStatus) -> [String; 5] {
    [
        row.name.clone(),
        display_version(&row.current_version).to_string(),
        display_version(&row.remote_version).to_string(),
        row.commits_behind.to_string(),
        state(row).to_string(),
    ]
}

/// Aligned table lines, header first.
pub fn table(rows: &[EntityStatus]) -> Vec<String> {
    let body: Vec<[String; 5]> = rows.iter().map(cells).collect();
    let mut widths = HEADERS.map(str::len);
    for cells in &body {
        for (width, cell) in widths.iter_mut().zip(cells) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    let header: Vec<String> = HEADERS.iter().map(|h| h.to_string()).collect();
    std::iter::once(line(header.as_slice()))
        .chain(body.iter().map(|cells| line(cells.as_slice())))
        .collect()
}

pub fn run_status(rows: &[EntityStatus]) {
    if rows.is_empty() {
        println!("{}", "Nothing declared".dimmed());
        return;
    }

    let lines = table(rows);
    println!("{}", lines[0].bold());
    for (text, row) in lines[1..].iter().zip(rows) {
        let text = match state(row) {
            "unfinished" | "to be removed" => text.yellow(),
            "update available" => text.cyan(),
            "not installed" => text.dimmed(),
            _ => text.normal(),
        };
        println!("{text}");
        if let Some(error) = &row.last_error {
            println!("    {} {}", "last error:".red(), error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::LockKey;
    use pretty_assertions::assert_eq;

    fn row(name: &str, current: &str, remote: &str) -> EntityStatus {
        EntityStatus {
            key: LockKey::Mcu(name.to_string()),
            name: name.to_string(),
            current_version: current.to_string(),
            remote_version: remote.to_string(),
            commits_behind: 0,
            installed: current != "?",
            unfinished: false,
            pending_removal: false,
            last_error: None,
        }
    }

    #[test]
    fn columns_are_aligned() {
        let mut behind = row("Klipper Macros", "v1.0", "v1.1");
        behind.commits_behind = 3;
        let lines = table(&[behind, row("MCU :: Toolhead", "?", "v0.12.0")]);

        assert_eq!(
            lines,
            vec![
                "Name             Installed  Available  Behind  State",
                "Klipper Macros   v1.0       v1.1       3       update available",
                "MCU :: Toolhead  unknown    v0.12.0    0       not installed",
            ]
        );
    }

    #[test]
    fn unfinished_wins_over_versions() {
        let mut stuck = row("Camera Tools", "v2", "v2");
        stuck.unfinished = true;
        assert_eq!(state(&stuck), "unfinished");
        stuck.pending_removal = true;
        assert_eq!(state(&stuck), "to be removed");
    }
}
