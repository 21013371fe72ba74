use std::sync::mpsc::Receiver;
use std::time::Duration;

use eframe::egui;
use egui::{Color32, Context};
use egui_plot::{Legend, Line, LineStyle::Solid, Plot, PlotPoints};

use crate::aggregator::TelemetryAggregator;
use crate::channel::{Channel, Quantity, Resolution};
use crate::command::CommandSink;
use crate::config::UiConfig;
use crate::link::LinkEvent;
use crate::session::Session;
use crate::window::RollingWindow;

const PWM_TEMPLATE: &str = " 00, 00, 00, 00, 00, 00, 00, 00";

// matplotlib "tab10"
const CELL_COLORS: [Color32; 8] = [
    Color32::from_rgb(31, 119, 180),
    Color32::from_rgb(255, 127, 14),
    Color32::from_rgb(44, 160, 44),
    Color32::from_rgb(214, 39, 40),
    Color32::from_rgb(148, 103, 189),
    Color32::from_rgb(140, 86, 75),
    Color32::from_rgb(227, 119, 194),
    Color32::from_rgb(127, 127, 127),
];

/// Plot-ready copy of one window: contiguous runs of filled slots.
struct Trace {
    cell: usize,
    segments: Vec<Vec<[f64; 2]>>,
}

pub struct BalancerUi<S> {
    rx: Receiver<LinkEvent>,
    session: Session<S>,
    config: UiConfig,
    pwm_text: String,
    notice: Option<String>,
    traces: [Vec<Trace>; 2],
}

impl<S: CommandSink> BalancerUi<S> {
    pub fn new(rx: Receiver<LinkEvent>, session: Session<S>, config: UiConfig) -> Self {
        Self {
            rx,
            session,
            config,
            pwm_text: PWM_TEMPLATE.to_string(),
            notice: None,
            traces: [Vec::new(), Vec::new()],
        }
    }

    fn rebuild_traces(&mut self) {
        let aggregator = self.session.aggregator();
        let resolution = self.session.selected();
        for quantity in Quantity::ALL {
            self.traces[quantity.index()] = traces(aggregator, quantity, resolution);
        }
    }

    fn status_line(&self) -> String {
        let aggregator = self.session.aggregator();
        let mut line = format!(
            "{} | {:?} | {} samples",
            self.session.status(),
            aggregator.readiness(),
            aggregator.sample_count()
        );
        if let Some(deviations) = self.session.deviations() {
            let worst = (0..deviations.cells())
                .filter_map(|cell| deviations.pair(cell))
                .map(|(v, _)| v)
                .max()
                .unwrap_or(0);
            line.push_str(&format!(" | max spread {worst} mV"));
        }
        if let Some(notice) = &self.notice {
            line.push_str(&format!(" | {notice}"));
        }
        line
    }

    fn controls(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let mut selected = self.session.selected();
            for resolution in [Resolution::Coarse, Resolution::Medium, Resolution::Fine] {
                if ui
                    .radio_value(&mut selected, resolution, resolution.label())
                    .clicked()
                {
                    self.session.select(resolution);
                }
            }
        });

        ui.label(self.status_line());

        ui.horizontal(|ui| {
            ui.label("0-100%");
            ui.text_edit_singleline(&mut self.pwm_text);
            let set = ui.add_enabled(self.session.is_connected(), egui::Button::new("Set PWM"));
            if set.clicked() {
                self.notice = self
                    .session
                    .submit_command(&self.pwm_text)
                    .err()
                    .map(|e| e.to_string());
            }
        });
    }

    fn plot(&self, ui: &mut egui::Ui, quantity: Quantity, height: f32) {
        let range = match quantity {
            Quantity::Voltage => self.config.voltage_range,
            Quantity::Current => self.config.current_range,
        };
        let capacity = self.session.aggregator().config().capacity;

        let plot = Plot::new(quantity.to_string())
            .height(height)
            .legend(Legend::default())
            .include_x(-1.0)
            .include_x(capacity as f64)
            .include_y(range[0])
            .include_y(range[1])
            .allow_drag(false)
            .allow_zoom(false)
            .allow_scroll(false)
            .show_grid(true);

        plot.show(ui, |plot_ui| {
            for trace in &self.traces[quantity.index()] {
                let color = CELL_COLORS[trace.cell % CELL_COLORS.len()];
                for segment in &trace.segments {
                    let line = Line::new(PlotPoints::from(segment.clone()))
                        .color(color)
                        .style(Solid)
                        .name(format!("Cell {} {}", trace.cell + 1, quantity.unit()));
                    plot_ui.line(line);
                }
            }
        });
    }
}

impl<S: CommandSink> eframe::App for BalancerUi<S> {
    fn update(&mut self, ctx: &Context, _frame: &mut eframe::Frame) {
        while let Ok(event) = self.rx.try_recv() {
            self.session.handle(event);
        }

        egui::TopBottomPanel::bottom("controls").show(ctx, |ui| self.controls(ui));

        if self.session.take_redraw() {
            self.rebuild_traces();
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            let height = ui.available_height() / 2.0 - ui.spacing().item_spacing.y;
            self.plot(ui, Quantity::Voltage, height);
            self.plot(ui, Quantity::Current, height);
        });

        ctx.request_repaint_after(Duration::from_millis(self.config.refresh_ms));
    }
}

fn traces(aggregator: &TelemetryAggregator, quantity: Quantity, resolution: Resolution) -> Vec<Trace> {
    (0..aggregator.config().cells)
        .filter_map(|cell| {
            let window = aggregator.window(Channel::new(cell, quantity), resolution)?;
            Some(Trace {
                cell,
                segments: segments(window),
            })
        })
        .collect()
}

/// Splits a window into runs of filled slots so empty slots render as gaps.
fn segments(window: &RollingWindow) -> Vec<Vec<[f64; 2]>> {
    let mut runs = Vec::new();
    let mut run = Vec::new();
    for (i, slot) in window.iter().enumerate() {
        match slot {
            Some(v) => run.push([i as f64, f64::from(v)]),
            None if !run.is_empty() => runs.push(std::mem::take(&mut run)),
            None => {}
        }
    }
    if !run.is_empty() {
        runs.push(run);
    }
    runs
}
