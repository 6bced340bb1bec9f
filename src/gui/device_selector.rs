//! Interactive choice of the display's serial port.

use std::{
    io::stdout,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::gui::error::GuiError;

use crossterm::{
    event::{self, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

/// Outcome of one key press in the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Move(usize),
    Pick(usize),
    Quit,
    Ignore,
}

fn navigate(cursor: usize, n_ports: usize, key: KeyCode) -> Step {
    match key {
        KeyCode::Down | KeyCode::Char('j') => Step::Move((cursor + 1) % n_ports),
        KeyCode::Up | KeyCode::Char('k') => Step::Move((cursor + n_ports - 1) % n_ports),
        KeyCode::Enter => Step::Pick(cursor),
        KeyCode::Char('q') | KeyCode::Esc => Step::Quit,
        _ => Step::Ignore,
    }
}

/// A guess at what sits behind a serial device node, from its name.
fn describe_port(path: &Path) -> &'static str {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name.starts_with("ttyUSB") {
        "USB serial adapter (CH340 / CP210x / FTDI)"
    } else if name.starts_with("ttyACM") {
        "USB CDC device"
    } else if name.starts_with("ttyAMA") || name.starts_with("ttyS") || name == "serial0" {
        "on-board UART (GPIO 14/15)"
    } else {
        "unknown serial device"
    }
}

/// Let the user pick the serial device of the touch display.
///
/// Returns `Ok(None)` if the user quit without choosing.
pub fn device_selector(mut available_ports: Vec<PathBuf>) -> Result<Option<PathBuf>, GuiError> {
    if available_ports.is_empty() {
        return Err(GuiError::NoDevices);
    }

    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let picked = select(&available_ports);
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(picked?.map(|i| available_ports.swap_remove(i)))
}

fn select(ports: &[PathBuf]) -> Result<Option<usize>, GuiError> {
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;
    terminal.clear()?;

    let mut list_state = ListState::default().with_selected(Some(0));
    loop {
        let cursor = list_state.selected().unwrap_or(0);
        let keys = Title::from(Line::from(vec![
            " Move ".into(),
            "<Up>/<Down>".cyan().bold(),
            " Use ".into(),
            "<Enter>".cyan().bold(),
            " Cancel ".into(),
            "<Q> ".cyan().bold(),
        ]));
        let list = List::new(ports.iter().map(|p| p.to_string_lossy()))
            .highlight_symbol("> ")
            .highlight_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD))
            .block(
                Block::default()
                    .title(
                        Title::from(format!(" Touch display port ({} found) ", ports.len()))
                            .alignment(Alignment::Center),
                    )
                    .title(keys.alignment(Alignment::Center).position(Position::Bottom))
                    .borders(Borders::ALL),
            );
        let details = Paragraph::new(vec![
            Line::from(ports[cursor].display().to_string().bold()),
            Line::from(describe_port(&ports[cursor])),
        ])
        .block(Block::default().title(" Details ").borders(Borders::ALL));

        terminal.draw(|frame| {
            let rows = Layout::vertical([Constraint::Min(3), Constraint::Length(4)]).split(frame.size());
            frame.render_stateful_widget(list, rows[0], &mut list_state);
            frame.render_widget(details, rows[1]);
        })?;

        if !event::poll(Duration::from_millis(16))? {
            continue;
        }
        let event::Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match navigate(cursor, ports.len(), key.code) {
            Step::Move(next) => list_state.select(Some(next)),
            Step::Pick(i) => return Ok(Some(i)),
            Step::Quit => return Ok(None),
            Step::Ignore => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_wraps() {
        assert_eq!(navigate(2, 3, KeyCode::Down), Step::Move(0));
        assert_eq!(navigate(0, 3, KeyCode::Up), Step::Move(2));
        assert_eq!(navigate(1, 3, KeyCode::Char('j')), Step::Move(2));
        assert_eq!(navigate(1, 3, KeyCode::Enter), Step::Pick(1));
        assert_eq!(navigate(1, 3, KeyCode::Esc), Step::Quit);
        assert_eq!(navigate(1, 3, KeyCode::Tab), Step::Ignore);
    }

    #[test]
    fn port_kinds() {
        assert_eq!(describe_port(Path::new("/dev/ttyUSB0")), "USB serial adapter (CH340 / CP210x / FTDI)");
        assert_eq!(describe_port(Path::new("/dev/ttyAMA0")), "on-board UART (GPIO 14/15)");
        assert_eq!(describe_port(Path::new("/dev/ttyACM1")), "USB CDC device");
        assert_eq!(describe_port(Path::new("/dev/null")), "unknown serial device");
    }

    #[test]
    fn nothing_to_choose() {
        assert!(matches!(device_selector(Vec::new()), Err(GuiError::NoDevices)));
    }
}
