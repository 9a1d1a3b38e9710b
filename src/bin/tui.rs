// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! gpufan-tui: terminal UI client that connects to the gpufan daemon
//! over a Unix domain socket and provides live monitoring and control.

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use gpu_fan_utility::client::Connection;
use gpu_fan_utility::config;
use gpu_fan_utility::controller::{
    ControlMode, DEFAULT_MAX_FAN_PCT, DEFAULT_MIN_FAN_PCT, DEFAULT_TARGET_C, TARGET_RANGE_C,
};
use gpu_fan_utility::curve::{ControlPoint, FanCurve, MAX_CURVE_TEMP_C};
use gpu_fan_utility::engine::FanMode;
use gpu_fan_utility::protocol::{Request, Response, StatusReport};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Gauge, List, ListItem, ListState, Paragraph, Row, Table, Tabs},
};
use std::io;
use std::time::Duration;

const ORANGE: Color = Color::Rgb(255, 165, 0);

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "gpufan-tui", about = "GPU fan control TUI client")]
struct Cli {
    /// Path to the daemon socket.
    #[arg(short, long, default_value = config::DEFAULT_SOCKET_PATH)]
    socket: String,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tab {
    Dashboard,
    Control,
    Curves,
    Config,
}

impl Tab {
    const ALL: [Tab; 4] = [Tab::Dashboard, Tab::Control, Tab::Curves, Tab::Config];

    fn index(self) -> usize {
        match self {
            Tab::Dashboard => 0,
            Tab::Control => 1,
            Tab::Curves => 2,
            Tab::Config => 3,
        }
    }

    fn title(self) -> &'static str {
        match self {
            Tab::Dashboard => "Dashboard",
            Tab::Control => "Fan Control",
            Tab::Curves => "Curve Editor",
            Tab::Config => "Config",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModeSelect {
    Auto,
    Fixed,
    Curve,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TargetField {
    Target,
    Min,
    Max,
}

#[derive(Debug, Clone)]
struct CurveEditState {
    name: String,
    points: Vec<ControlPoint>,
    selected_point: usize,
    editing_field: CurveField,
    is_new: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CurveField {
    Name,
    Temp,
    Fan,
}

struct App {
    tab: Tab,
    running: bool,
    status_message: String,
    connection: Option<Connection>,

    // Dashboard
    status: Option<StatusReport>,

    // Fan control
    mode_select: ModeSelect,
    fixed_pct: u8,
    curve_select: usize,
    target_c: f64,
    target_min: u8,
    target_max: u8,
    target_field: TargetField,

    // Curve editor
    curves: Vec<FanCurve>,
    curve_list_state: ListState,
    editing_curve: Option<CurveEditState>,
}

impl App {
    fn new(socket_path: &str) -> Self {
        let connection = match Connection::connect(socket_path) {
            Ok(c) => {
                log::info!("Connected to daemon at {socket_path}");
                Some(c)
            }
            Err(e) => {
                log::error!("Could not connect to daemon: {e}");
                None
            }
        };

        let mut app = Self {
            tab: Tab::Dashboard,
            running: true,
            status_message: String::new(),
            connection,
            status: None,
            mode_select: ModeSelect::Auto,
            fixed_pct: 50,
            curve_select: 0,
            target_c: DEFAULT_TARGET_C,
            target_min: DEFAULT_MIN_FAN_PCT,
            target_max: DEFAULT_MAX_FAN_PCT,
            target_field: TargetField::Target,
            curves: Vec::new(),
            curve_list_state: ListState::default(),
            editing_curve: None,
        };

        if app.connection.is_some() {
            app.refresh_status();
            app.refresh_curves();
            app.load_active_mode();
        } else {
            app.status_message = "Not connected to daemon. Is gpufan-daemon running?".to_string();
        }

        app
    }

    /// Send a request, dropping the connection on transport errors.
    fn request(&mut self, req: &Request) -> Option<Response> {
        let conn = self.connection.as_mut()?;
        match conn.send_request(req) {
            Ok(Response::Error { message }) => {
                self.status_message = format!("Error: {message}");
                None
            }
            Ok(resp) => Some(resp),
            Err(e) => {
                self.status_message = format!("Connection error: {e}");
                self.connection = None;
                None
            }
        }
    }

    /// Send a request that answers with a plain ok message.
    fn command(&mut self, req: &Request) -> bool {
        match self.request(req) {
            Some(Response::Ok { message }) => {
                self.status_message = message;
                true
            }
            _ => false,
        }
    }

    fn refresh_status(&mut self) {
        if let Some(Response::Status(report)) = self.request(&Request::GetStatus) {
            self.status = Some(report);
        }
    }

    fn refresh_curves(&mut self) {
        if let Some(Response::Curves { curves }) = self.request(&Request::ListCurves) {
            self.curves = curves;
            if self.curve_select >= self.curves.len() {
                self.curve_select = 0;
            }
        }
    }

    /// Preselect the control panel to match what the daemon is doing.
    fn load_active_mode(&mut self) {
        let Some(report) = &self.status else {
            return;
        };
        match &report.mode {
            FanMode::Auto => self.mode_select = ModeSelect::Auto,
            FanMode::Fixed { speed_pct } => {
                self.mode_select = ModeSelect::Fixed;
                self.fixed_pct = *speed_pct;
            }
            FanMode::Curve { curve_name } => {
                self.mode_select = ModeSelect::Curve;
                if let Some(idx) = self.curves.iter().position(|c| c.name() == curve_name) {
                    self.curve_select = idx;
                }
            }
            FanMode::Target {
                target_c,
                min_pct,
                max_pct,
            } => {
                self.mode_select = ModeSelect::Target;
                self.target_c = *target_c;
                self.target_min = *min_pct;
                self.target_max = *max_pct;
            }
        }
    }

    fn apply_mode(&mut self) {
        let req = match self.mode_select {
            ModeSelect::Auto => Request::SetAuto,
            ModeSelect::Fixed => Request::SetFixed {
                speed_pct: self.fixed_pct,
            },
            ModeSelect::Curve => {
                let Some(curve) = self.curves.get(self.curve_select) else {
                    self.status_message = "Create a curve first".to_string();
                    return;
                };
                Request::UseCurve {
                    curve_name: curve.name().to_string(),
                }
            }
            ModeSelect::Target => Request::SetTarget {
                target_c: self.target_c,
                min_pct: self.target_min,
                max_pct: self.target_max,
            },
        };

        self.command(&req);
        self.refresh_status();
    }

    fn save_curve(&mut self) {
        let Some(edit) = &self.editing_curve else {
            return;
        };
        let req = Request::UpsertCurve {
            name: edit.name.clone(),
            points: edit.points.clone(),
        };

        if self.command(&req) {
            self.editing_curve = None;
            self.refresh_curves();
        }
    }

    fn delete_selected_curve(&mut self) {
        let Some(curve) = self
            .curve_list_state
            .selected()
            .and_then(|idx| self.curves.get(idx))
        else {
            return;
        };
        let req = Request::DeleteCurve {
            name: curve.name().to_string(),
        };

        if self.command(&req) {
            self.refresh_curves();
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(&cli.socket);

    let result = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> anyhow::Result<()> {
    let tick_rate = Duration::from_millis(500);

    while app.running {
        terminal.draw(|f| ui(f, app))?;

        if event::poll(tick_rate)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                handle_input(app, key.code, key.modifiers);
            }
        } else {
            // Periodic refresh
            app.refresh_status();
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Input handling
// ---------------------------------------------------------------------------

fn handle_input(app: &mut App, key: KeyCode, modifiers: KeyModifiers) {
    // Global keys
    match key {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
            app.running = false;
            return;
        }
        KeyCode::Char('q') if app.editing_curve.is_none() => {
            app.running = false;
            return;
        }
        _ => {}
    }

    if app.editing_curve.is_some() {
        handle_curve_edit_input(app, key);
        return;
    }

    // Tab switching
    match key {
        KeyCode::Char('1') => app.tab = Tab::Dashboard,
        KeyCode::Char('2') => app.tab = Tab::Control,
        KeyCode::Char('3') => app.tab = Tab::Curves,
        KeyCode::Char('4') => app.tab = Tab::Config,
        KeyCode::Tab => {
            let idx = (app.tab.index() + 1) % Tab::ALL.len();
            app.tab = Tab::ALL[idx];
        }
        KeyCode::BackTab => {
            let idx = (app.tab.index() + Tab::ALL.len() - 1) % Tab::ALL.len();
            app.tab = Tab::ALL[idx];
        }
        _ => {}
    }

    match app.tab {
        Tab::Dashboard => {
            if key == KeyCode::Char('r') {
                app.refresh_status();
                app.status_message = "Refreshed".to_string();
            }
        }
        Tab::Control => handle_control_input(app, key),
        Tab::Curves => handle_curve_list_input(app, key),
        Tab::Config => handle_config_input(app, key),
    }
}

fn handle_control_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char('a') => app.mode_select = ModeSelect::Auto,
        KeyCode::Char('f') => app.mode_select = ModeSelect::Fixed,
        KeyCode::Char('c') => app.mode_select = ModeSelect::Curve,
        KeyCode::Char('t') => app.mode_select = ModeSelect::Target,
        KeyCode::Up | KeyCode::Char('k') if app.mode_select == ModeSelect::Target => {
            app.target_field = match app.target_field {
                TargetField::Target => TargetField::Max,
                TargetField::Min => TargetField::Target,
                TargetField::Max => TargetField::Min,
            };
        }
        KeyCode::Down | KeyCode::Char('j') if app.mode_select == ModeSelect::Target => {
            app.target_field = match app.target_field {
                TargetField::Target => TargetField::Min,
                TargetField::Min => TargetField::Max,
                TargetField::Max => TargetField::Target,
            };
        }
        KeyCode::Left | KeyCode::Char('h') => adjust_control(app, -1),
        KeyCode::Right | KeyCode::Char('l') => adjust_control(app, 1),
        KeyCode::Enter => app.apply_mode(),
        _ => {}
    }
}

fn adjust_control(app: &mut App, dir: i16) {
    match app.mode_select {
        ModeSelect::Auto => {}
        ModeSelect::Fixed => app.fixed_pct = step_pct(app.fixed_pct, dir * 5),
        ModeSelect::Curve => {
            let count = app.curves.len();
            if count > 0 {
                app.curve_select = if dir < 0 {
                    (app.curve_select + count - 1) % count
                } else {
                    (app.curve_select + 1) % count
                };
            }
        }
        ModeSelect::Target => match app.target_field {
            TargetField::Target => {
                app.target_c =
                    (app.target_c + f64::from(dir)).clamp(TARGET_RANGE_C.0, TARGET_RANGE_C.1);
            }
            TargetField::Min => {
                app.target_min = step_pct(app.target_min, dir * 5).min(app.target_max);
            }
            TargetField::Max => {
                app.target_max = step_pct(app.target_max, dir * 5).max(app.target_min);
            }
        },
    }
}

fn step_pct(value: u8, delta: i16) -> u8 {
    (i16::from(value) + delta).clamp(0, 100) as u8
}

fn handle_curve_list_input(app: &mut App, key: KeyCode) {
    let curve_count = app.curves.len();
    match key {
        KeyCode::Up | KeyCode::Char('k') => {
            if curve_count > 0 {
                let i = app.curve_list_state.selected().unwrap_or(0);
                let new_i = if i == 0 { curve_count - 1 } else { i - 1 };
                app.curve_list_state.select(Some(new_i));
            }
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if curve_count > 0 {
                let i = app.curve_list_state.selected().unwrap_or(0);
                let new_i = (i + 1) % curve_count;
                app.curve_list_state.select(Some(new_i));
            }
        }
        KeyCode::Char('n') => {
            app.editing_curve = Some(CurveEditState {
                name: "new_curve".to_string(),
                points: vec![ControlPoint::new(30.0, 30.0), ControlPoint::new(90.0, 100.0)],
                selected_point: 0,
                editing_field: CurveField::Name,
                is_new: true,
            });
        }
        KeyCode::Enter | KeyCode::Char('e') => {
            if let Some(curve) = app
                .curve_list_state
                .selected()
                .and_then(|idx| app.curves.get(idx))
            {
                app.editing_curve = Some(CurveEditState {
                    name: curve.name().to_string(),
                    points: curve.points().to_vec(),
                    selected_point: 0,
                    editing_field: CurveField::Temp,
                    is_new: false,
                });
            }
        }
        KeyCode::Char('d') | KeyCode::Delete => {
            app.delete_selected_curve();
        }
        _ => {}
    }
}

fn handle_curve_edit_input(app: &mut App, key: KeyCode) {
    let Some(edit) = &mut app.editing_curve else {
        return;
    };

    match key {
        KeyCode::Esc => {
            app.editing_curve = None;
        }
        KeyCode::Tab => {
            edit.editing_field = match edit.editing_field {
                CurveField::Name => CurveField::Temp,
                CurveField::Temp => CurveField::Fan,
                CurveField::Fan => CurveField::Name,
            };
        }
        KeyCode::Up | KeyCode::Char('k') if edit.editing_field != CurveField::Name => {
            edit.selected_point = edit.selected_point.saturating_sub(1);
        }
        KeyCode::Down | KeyCode::Char('j') if edit.editing_field != CurveField::Name => {
            if edit.selected_point + 1 < edit.points.len() {
                edit.selected_point += 1;
            }
        }
        KeyCode::Left | KeyCode::Char('h') if edit.editing_field != CurveField::Name => {
            if let Some(point) = edit.points.get_mut(edit.selected_point) {
                match edit.editing_field {
                    CurveField::Temp => point.temp_c = (point.temp_c - 1.0).max(0.0),
                    CurveField::Fan => point.fan_pct = (point.fan_pct - 5.0).max(0.0),
                    CurveField::Name => {}
                }
            }
        }
        KeyCode::Right | KeyCode::Char('l') if edit.editing_field != CurveField::Name => {
            if let Some(point) = edit.points.get_mut(edit.selected_point) {
                match edit.editing_field {
                    CurveField::Temp => point.temp_c = (point.temp_c + 1.0).min(MAX_CURVE_TEMP_C),
                    CurveField::Fan => point.fan_pct = (point.fan_pct + 5.0).min(100.0),
                    CurveField::Name => {}
                }
            }
        }
        KeyCode::Char('+') | KeyCode::Char('=') if edit.editing_field != CurveField::Name => {
            let new_temp = edit
                .points
                .last()
                .map(|p| p.temp_c + 10.0)
                .unwrap_or(50.0)
                .min(MAX_CURVE_TEMP_C);
            edit.points.push(ControlPoint::new(new_temp, 100.0));
            edit.selected_point = edit.points.len() - 1;
        }
        KeyCode::Char('-') if edit.editing_field != CurveField::Name => {
            // Keep at least 2 points
            if edit.points.len() > 2 {
                edit.points.remove(edit.selected_point);
                if edit.selected_point >= edit.points.len() {
                    edit.selected_point = edit.points.len() - 1;
                }
            }
        }
        KeyCode::Backspace => {
            if edit.editing_field == CurveField::Name {
                edit.name.pop();
            }
        }
        KeyCode::Char(ch) => {
            if edit.editing_field == CurveField::Name
                && (ch.is_alphanumeric() || ch == '_' || ch == '-' || ch == ' ')
            {
                edit.name.push(ch);
            }
        }
        KeyCode::Enter => {
            app.save_curve();
        }
        _ => {}
    }
}

fn handle_config_input(app: &mut App, key: KeyCode) {
    match key {
        KeyCode::Char('s') => {
            app.command(&Request::SaveConfig);
        }
        KeyCode::Char('r') => {
            if app.command(&Request::ReloadConfig) {
                app.refresh_status();
                app.refresh_curves();
                app.load_active_mode();
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// UI rendering
// ---------------------------------------------------------------------------

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // tab bar
            Constraint::Min(0),    // content
            Constraint::Length(4), // status bar
        ])
        .split(f.area());

    draw_tabs(f, app, chunks[0]);

    match app.tab {
        Tab::Dashboard => draw_dashboard(f, app, chunks[1]),
        Tab::Control => draw_control(f, app, chunks[1]),
        Tab::Curves => draw_curve_list(f, app, chunks[1]),
        Tab::Config => draw_config(f, app, chunks[1]),
    }

    draw_status_bar(f, app, chunks[2]);

    if app.editing_curve.is_some() {
        draw_curve_edit_overlay(f, app);
    }
}

fn draw_tabs(f: &mut Frame, app: &App, area: Rect) {
    let titles: Vec<Line> = Tab::ALL.iter().map(|t| Line::from(t.title())).collect();

    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL).title(" gpufan "))
        .select(app.tab.index())
        .style(Style::default().fg(Color::Gray))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        );

    f.render_widget(tabs, area);
}

fn draw_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let connected = if app.connection.is_some() {
        Span::styled(" CONNECTED ", Style::default().fg(Color::Green).bold())
    } else {
        Span::styled(" DISCONNECTED ", Style::default().fg(Color::Red).bold())
    };

    let msg = Span::raw(format!("  {}", app.status_message));

    let help = match app.tab {
        Tab::Dashboard => " [r]efresh  [q]uit ",
        Tab::Control => {
            " [a]uto [f]ixed [c]urve [t]arget  [h/l]adjust  [j/k]field  [Enter]apply  [q]uit "
        }
        Tab::Curves => " [j/k]nav  [n]ew [e]dit [d]elete  [q]uit ",
        Tab::Config => " [s]ave  [r]eload  [q]uit ",
    };

    let status_line = Line::from(vec![connected, msg]);
    let help_line = Line::from(Span::styled(help, Style::default().fg(Color::DarkGray)));

    let paragraph =
        Paragraph::new(vec![status_line, help_line]).block(Block::default().borders(Borders::ALL));

    f.render_widget(paragraph, area);
}

/// Gray when unknown, red above 80°C, orange above 70°C, green otherwise.
fn temp_color(temp_c: Option<f64>) -> Color {
    match temp_c {
        None => Color::Gray,
        Some(t) if t > 80.0 => Color::Red,
        Some(t) if t > 70.0 => ORANGE,
        Some(_) => Color::Green,
    }
}

fn draw_dashboard(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let gpu = app.status.as_ref().and_then(|s| s.gpu.as_ref());

    // GPU readings
    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(9), Constraint::Length(3), Constraint::Min(0)])
        .split(chunks[0]);

    let gpu_lines = match gpu {
        Some(g) => {
            let temp = g
                .temp_c
                .map(|t| format!("{t:.1}°C"))
                .unwrap_or_else(|| "??°C".to_string());
            let pwm_mode = match g.pwm_enable {
                Some(0) => "Off",
                Some(1) => "Manual",
                Some(2) => "Auto",
                Some(_) => "?",
                None => "-",
            };
            vec![
                Line::from(format!("Card:   {} ({})", g.card, g.name)),
                Line::from(""),
                Line::from(vec![
                    Span::raw("Temp:   "),
                    Span::styled(temp, Style::default().fg(temp_color(g.temp_c)).bold()),
                ]),
                Line::from(format!(
                    "Fan:    {}",
                    g.fan_pct.map(|p| format!("{p}%")).unwrap_or_else(|| "??%".to_string())
                )),
                Line::from(format!(
                    "RPM:    {}",
                    g.rpm.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
                )),
                Line::from(format!(
                    "PWM:    {} ({pwm_mode})",
                    g.pwm.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
                )),
            ]
        }
        None => vec![Line::from(Span::styled(
            "No controllable GPU",
            Style::default().fg(Color::Gray),
        ))],
    };

    let gpu_widget =
        Paragraph::new(gpu_lines).block(Block::default().borders(Borders::ALL).title(" GPU "));
    f.render_widget(gpu_widget, left[0]);

    let fan_pct = gpu.and_then(|g| g.fan_pct).unwrap_or(0);
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Fan "))
        .gauge_style(Style::default().fg(Color::Cyan))
        .percent(u16::from(fan_pct.min(100)));
    f.render_widget(gauge, left[1]);

    // Control state
    let mut control_lines = Vec::new();
    match &app.status {
        Some(report) => {
            control_lines.push(Line::from(format!("Mode: {}", report.mode)));
            control_lines.push(Line::from(format!(
                "Last command: {}",
                report
                    .commanded_pct
                    .map(|p| format!("{p}%"))
                    .unwrap_or_else(|| "-".to_string())
            )));
            if let Some(c) = &report.controller {
                let (label, color) = match c.mode {
                    ControlMode::Aggressive => ("aggressive", Color::Yellow),
                    ControlMode::Gentle => ("gentle", Color::Green),
                };
                control_lines.push(Line::from(""));
                control_lines.push(Line::from(format!(
                    "Target: {:.0}°C  ({}%-{}%)",
                    c.target_c, c.min_pct, c.max_pct
                )));
                control_lines.push(Line::from(vec![
                    Span::raw("Controller: "),
                    Span::styled(label, Style::default().fg(color).bold()),
                    Span::raw(format!("  stable samples: {}", c.stable_count)),
                ]));
                let history = c
                    .history
                    .iter()
                    .map(|t| format!("{t:.0}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                control_lines.push(Line::from(format!("History: {history}")));
            }
        }
        None => control_lines.push(Line::from("No status from daemon")),
    }

    let control_widget = Paragraph::new(control_lines)
        .block(Block::default().borders(Borders::ALL).title(" Control "));
    f.render_widget(control_widget, chunks[1]);
}

fn mode_span(selected: bool, label: &'static str, color: Color) -> Span<'static> {
    if selected {
        Span::styled(format!(" ● {label} "), Style::default().fg(color).bold())
    } else {
        Span::styled(format!(" ○ {label} "), Style::default().fg(Color::Gray))
    }
}

fn draw_control(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5), // Mode selector
            Constraint::Length(7), // Control value
            Constraint::Min(0),    // Info
        ])
        .split(area);

    let mode_text = vec![
        Line::from(vec![
            mode_span(app.mode_select == ModeSelect::Auto, "Auto", Color::Green),
            Span::raw("  "),
            mode_span(app.mode_select == ModeSelect::Fixed, "Fixed", Color::Yellow),
            Span::raw("  "),
            mode_span(app.mode_select == ModeSelect::Curve, "Curve", Color::Magenta),
            Span::raw("  "),
            mode_span(app.mode_select == ModeSelect::Target, "Target", Color::Cyan),
        ]),
        Line::from(""),
        Line::from(Span::styled(
            " Press [a]uto [f]ixed [c]urve [t]arget to switch mode",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let mode_widget =
        Paragraph::new(mode_text).block(Block::default().borders(Borders::ALL).title(" Mode "));
    f.render_widget(mode_widget, chunks[0]);

    let hint = |text: &'static str| Line::from(Span::styled(text, Style::default().fg(Color::DarkGray)));
    let control_text = match app.mode_select {
        ModeSelect::Auto => vec![
            Line::from("Fan controlled by the GPU driver"),
            hint("Press [Enter] to apply"),
        ],
        ModeSelect::Fixed => {
            let bar_width = 30;
            let filled = usize::from(app.fixed_pct) * bar_width / 100;
            vec![
                Line::from(format!(
                    "[{}{}] {}%",
                    "█".repeat(filled),
                    "░".repeat(bar_width - filled),
                    app.fixed_pct
                )),
                hint("Use [h/l] or [←/→] to adjust, [Enter] to apply"),
            ]
        }
        ModeSelect::Curve => {
            let curve_name = app
                .curves
                .get(app.curve_select)
                .map(|c| c.name())
                .unwrap_or("(none)");
            vec![
                Line::from(format!("Curve: {curve_name}  (use [h/l] to cycle)")),
                hint("[Enter] to apply"),
            ]
        }
        ModeSelect::Target => {
            let field = |which: TargetField, text: String| {
                if app.target_field == which {
                    Line::from(Span::styled(
                        format!("▶ {text}"),
                        Style::default().fg(Color::Cyan).bold(),
                    ))
                } else {
                    Line::from(format!("  {text}"))
                }
            };
            vec![
                field(TargetField::Target, format!("Target:    {:.0}°C", app.target_c)),
                field(TargetField::Min, format!("Min speed: {}%", app.target_min)),
                field(TargetField::Max, format!("Max speed: {}%", app.target_max)),
                Line::from(""),
                hint("[j/k] select field, [h/l] adjust, [Enter] to apply"),
            ]
        }
    };

    let control_widget = Paragraph::new(control_text)
        .block(Block::default().borders(Borders::ALL).title(" Value "));
    f.render_widget(control_widget, chunks[1]);

    let info = match &app.status {
        Some(report) => {
            let temp = report.gpu.as_ref().and_then(|g| g.temp_c);
            vec![
                Line::from(format!("Active mode: {}", report.mode)),
                Line::from(vec![
                    Span::raw("Temperature: "),
                    Span::styled(
                        temp.map(|t| format!("{t:.1}°C")).unwrap_or_else(|| "??°C".to_string()),
                        Style::default().fg(temp_color(temp)),
                    ),
                ]),
                Line::from(format!(
                    "Fan: {}",
                    report
                        .commanded_pct
                        .map(|p| format!("{p}%"))
                        .unwrap_or_else(|| "-".to_string())
                )),
            ]
        }
        None => vec![Line::from("No status from daemon")],
    };

    let info_widget = Paragraph::new(info)
        .block(Block::default().borders(Borders::ALL).title(" Current Status "));
    f.render_widget(info_widget, chunks[2]);
}

fn draw_curve_list(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(area);

    let active_curve = match app.status.as_ref().map(|s| &s.mode) {
        Some(FanMode::Curve { curve_name }) => Some(curve_name.as_str()),
        _ => None,
    };

    let items: Vec<ListItem> = app
        .curves
        .iter()
        .map(|c| {
            let marker = if Some(c.name()) == active_curve { " (active)" } else { "" };
            ListItem::new(format!("{}{marker}", c.name()))
        })
        .collect();

    let curve_list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" Curves "))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    f.render_stateful_widget(curve_list, chunks[0], &mut app.curve_list_state.clone());

    let preview = match app
        .curve_list_state
        .selected()
        .and_then(|idx| app.curves.get(idx))
    {
        Some(curve) => render_curve_graph(curve),
        None => vec![Line::from("Select a curve or press [n] to create one")],
    };

    let preview_widget = Paragraph::new(preview)
        .block(Block::default().borders(Borders::ALL).title(" Curve Preview "));
    f.render_widget(preview_widget, chunks[1]);
}

fn render_curve_graph(curve: &FanCurve) -> Vec<Line<'static>> {
    let graph_height = 11usize;
    let graph_width = 50usize;

    let mut lines = Vec::new();
    lines.push(Line::from(format!("  Curve: {}", curve.name())));
    lines.push(Line::from(""));

    let mut grid = vec![vec![' '; graph_width]; graph_height];

    let points = curve.points();
    let min_temp = points.first().map(|p| p.temp_c).unwrap_or(0.0);
    let max_temp = points.last().map(|p| p.temp_c).unwrap_or(100.0);
    let temp_range = (max_temp - min_temp).max(1.0);

    for x in 0..graph_width {
        let temp = min_temp + (x as f64 / (graph_width - 1) as f64) * temp_range;
        let pct = curve.speed_for(temp).clamp(0.0, 100.0);
        let y = ((pct / 100.0) * (graph_height - 1) as f64).round() as usize;
        let row = graph_height - 1 - y.min(graph_height - 1);
        grid[row][x] = '█';
    }

    for (i, row) in grid.iter().enumerate() {
        let pct_label = 100 - (i * 100 / (graph_height - 1));
        let row_str: String = row.iter().collect();
        lines.push(Line::from(format!("  {pct_label:>3}% │{row_str}")));
    }

    lines.push(Line::from(format!("       └{}", "─".repeat(graph_width))));
    lines.push(Line::from(format!(
        "        {min_temp:.0}°C{:>width$}{max_temp:.0}°C",
        "",
        width = graph_width - 8
    )));

    lines.push(Line::from(""));
    lines.push(Line::from("  Points:"));
    for p in points {
        lines.push(Line::from(format!("    {:.0}°C → {:.0}%", p.temp_c, p.fan_pct)));
    }

    lines
}

fn draw_curve_edit_overlay(f: &mut Frame, app: &App) {
    let Some(edit) = &app.editing_curve else {
        return;
    };

    let area = centered_rect(60, 70, f.area());
    f.render_widget(Clear, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Name
            Constraint::Min(0),    // Points table
            Constraint::Length(3), // Help
        ])
        .margin(1)
        .split(area);

    let title = if edit.is_new { " New Curve " } else { " Edit Curve " };
    f.render_widget(Block::default().borders(Borders::ALL).title(title), area);

    let name_style = if edit.editing_field == CurveField::Name {
        Style::default().fg(Color::Cyan).bold()
    } else {
        Style::default()
    };
    let name_widget = Paragraph::new(format!("Name: {}", edit.name))
        .style(name_style)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Name [Tab to switch field] "),
        );
    f.render_widget(name_widget, chunks[0]);

    let highlight = Style::default().fg(Color::Yellow).bold();
    let point_rows: Vec<Row> = edit
        .points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let selected = i == edit.selected_point;
            let style = if selected {
                Style::default().fg(Color::Cyan).bold()
            } else {
                Style::default()
            };
            let temp_style = if selected && edit.editing_field == CurveField::Temp {
                highlight
            } else {
                style
            };
            let fan_style = if selected && edit.editing_field == CurveField::Fan {
                highlight
            } else {
                style
            };

            Row::new(vec![
                Cell::from(format!("{}", i + 1)).style(style),
                Cell::from(format!("{:.0}°C", p.temp_c)).style(temp_style),
                Cell::from(format!("{:.0}%", p.fan_pct)).style(fan_style),
            ])
        })
        .collect();

    let points_table = Table::new(
        point_rows,
        [
            Constraint::Length(4),
            Constraint::Percentage(40),
            Constraint::Percentage(50),
        ],
    )
    .header(Row::new(vec!["#", "Temp", "Fan"]).style(Style::default().fg(Color::Cyan).bold()))
    .block(Block::default().borders(Borders::ALL).title(" Points "));

    f.render_widget(points_table, chunks[1]);

    let help = Paragraph::new(
        " [j/k]select  [h/l]adjust  [+]add  [-]remove  [Tab]field  [Enter]save  [Esc]cancel ",
    )
    .style(Style::default().fg(Color::DarkGray))
    .block(Block::default().borders(Borders::ALL));

    f.render_widget(help, chunks[2]);
}

fn draw_config(f: &mut Frame, app: &App, area: Rect) {
    let config_path = app
        .status
        .as_ref()
        .map(|s| s.config_path.clone())
        .unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
    let mode = app
        .status
        .as_ref()
        .map(|s| s.mode.to_string())
        .unwrap_or_else(|| "-".to_string());

    let config_info = vec![
        Line::from(format!("Config path: {config_path}")),
        Line::from(format!("Active mode: {mode}")),
        Line::from(format!("Curves:      {}", app.curves.len())),
        Line::from(""),
        Line::from(vec![
            Span::styled("[s]", Style::default().fg(Color::Cyan).bold()),
            Span::raw(" Save current configuration"),
        ]),
        Line::from(vec![
            Span::styled("[r]", Style::default().fg(Color::Cyan).bold()),
            Span::raw(" Reload configuration from disk"),
        ]),
    ];

    let config_widget = Paragraph::new(config_info)
        .block(Block::default().borders(Borders::ALL).title(" Configuration "));
    f.render_widget(config_widget, area);
}

/// Utility: create a centered rect.
fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpu_fan_utility::curve::default_curve;

    #[test]
    fn test_temp_color_bands() {
        assert_eq!(temp_color(None), Color::Gray);
        assert_eq!(temp_color(Some(65.0)), Color::Green);
        assert_eq!(temp_color(Some(70.0)), Color::Green);
        assert_eq!(temp_color(Some(75.0)), ORANGE);
        assert_eq!(temp_color(Some(81.0)), Color::Red);
    }

    #[test]
    fn test_step_pct_clamps() {
        assert_eq!(step_pct(98, 5), 100);
        assert_eq!(step_pct(3, -5), 0);
        assert_eq!(step_pct(50, 5), 55);
    }

    #[test]
    fn test_curve_graph_spans_axis() {
        let lines = render_curve_graph(&default_curve());
        // title, blank, 11 rows, axis, labels, blank, "Points:", 5 points
        assert_eq!(lines.len(), 2 + 11 + 2 + 2 + 5);
    }
}
