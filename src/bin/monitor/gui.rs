use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use std::{
    error::Error,
    io,
    time::{Duration, Instant},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    style::{Color, Style},
    symbols,
    text::Span,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType},
    Frame, Terminal,
};

/// What the chart shows on one tick.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Seconds since the monitor started.
    pub now: f64,
    /// `(seconds, centimetres)` of the recent valid readings.
    pub trace: Vec<(f64, f64)>,
    pub confirmed: bool,
    pub wake_cm: f64,
    pub sleep_cm: f64,
}

type SnapshotSource = Box<dyn FnMut() -> Snapshot>;

/// Seconds shown on the x axis.
const WINDOW_SECS: f64 = 30.0;

struct App {
    source: SnapshotSource,
    snapshot: Snapshot,
}

impl App {
    fn new(source: SnapshotSource) -> App {
        App {
            source,
            snapshot: Snapshot::default(),
        }
    }

    fn on_tick(&mut self) {
        self.snapshot = (self.source)();
    }
}

pub fn engage_gui(source: SnapshotSource) -> Result<(), Box<dyn Error>> {
    // setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let tick_rate = Duration::from_millis(200);
    let res = run_app(&mut terminal, App::new(source), tick_rate);

    // restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, mut app: App, tick_rate: Duration) -> io::Result<()> {
    let mut last_tick = Instant::now();
    loop {
        terminal.draw(|f| ui(f, &app))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| Duration::from_secs(0));
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if let KeyCode::Char('q') = key.code {
                    return Ok(());
                }
            }
        }
        if last_tick.elapsed() >= tick_rate {
            app.on_tick();
            last_tick = Instant::now();
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let s = &app.snapshot;
    let x_min = (s.now - WINDOW_SECS).max(0.0);
    let x_max = x_min + WINDOW_SECS;
    let y_max = s
        .trace
        .iter()
        .map(|&(_, d)| d)
        .fold(s.sleep_cm * 2.0, f64::max)
        .ceil();

    let wake = [(x_min, s.wake_cm), (x_max, s.wake_cm)];
    let sleep = [(x_min, s.sleep_cm), (x_max, s.sleep_cm)];
    let (state, colour) = if s.confirmed {
        ("PRESENT", Color::Green)
    } else {
        ("absent", Color::DarkGray)
    };
    let title = match s.trace.last() {
        Some(&(_, d)) => format!(" {} | {:.1} cm | q to quit ", state, d),
        None => format!(" {} | no reading | q to quit ", state),
    };

    let chart = Chart::new(vec![
        Dataset::default()
            .name("distance")
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Cyan))
            .data(&s.trace),
        Dataset::default()
            .name("wake")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Yellow))
            .data(&wake),
        Dataset::default()
            .name("sleep")
            .marker(symbols::Marker::Dot)
            .graph_type(GraphType::Line)
            .style(Style::default().fg(Color::Red))
            .data(&sleep),
    ])
    .block(
        Block::default()
            .title(Span::styled(title, Style::default().fg(colour)))
            .borders(Borders::ALL),
    )
    .x_axis(
        Axis::default()
            .title("seconds")
            .style(Style::default().fg(Color::White))
            .bounds([x_min, x_max])
            .labels(
                [x_min, x_max]
                    .iter()
                    .map(|v| Span::from(format!("{:.0}", v)))
                    .collect(),
            ),
    )
    .y_axis(
        Axis::default()
            .title("cm")
            .style(Style::default().fg(Color::White))
            .bounds([0.0, y_max])
            .labels(
                [0.0, y_max / 2.0, y_max]
                    .iter()
                    .map(|v| Span::from(format!("{:.0}", v)))
                    .collect(),
            ),
    );

    f.render_widget(chart, f.size());
}
