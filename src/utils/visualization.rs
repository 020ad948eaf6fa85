//! Visualization utilities for planner_core
//!
//! Plots 2D projections of a configuration space using gnuplot: two DOF
//! indices select the axes, everything else is dropped.

use gnuplot::{AutoOption, AxesCommon, Caption, Color, Figure, LineWidth, PointSize, PointSymbol};

use crate::common::{PlanningError, PlanningResult, Trajectory};
use crate::path_planning::rrt::RrtNode;

/// Color palette for consistent styling
pub mod colors {
    pub const BLACK: &str = "#000000";
    pub const RED: &str = "#FF0000";
    pub const GREEN: &str = "#00FF00";
    pub const BLUE: &str = "#0000FF";
    pub const GRAY: &str = "#808080";
    pub const ORANGE: &str = "#FFA500";

    // Semantic colors
    pub const OBSTACLE: &str = BLACK;
    pub const START: &str = GREEN;
    pub const GOAL: &str = BLUE;
    pub const PATH: &str = RED;
    pub const TREE: &str = GRAY;
    pub const SHORTCUT: &str = ORANGE;
}

/// Style for path rendering
#[derive(Debug, Clone)]
pub struct PathStyle {
    pub color: String,
    pub line_width: f64,
    pub caption: String,
}

impl PathStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self {
            color: color.to_string(),
            line_width: 2.0,
            caption: caption.to_string(),
        }
    }

    pub fn with_line_width(mut self, width: f64) -> Self {
        self.line_width = width;
        self
    }
}

impl Default for PathStyle {
    fn default() -> Self {
        Self {
            color: colors::PATH.to_string(),
            line_width: 2.0,
            caption: "Path".to_string(),
        }
    }
}

/// Style for point rendering
#[derive(Debug, Clone)]
pub struct PointStyle {
    pub color: String,
    pub size: f64,
    pub symbol: char,
    pub caption: String,
}

impl PointStyle {
    pub fn new(color: &str, caption: &str) -> Self {
        Self {
            color: color.to_string(),
            size: 1.0,
            symbol: 'O',
            caption: caption.to_string(),
        }
    }

    pub fn with_size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn with_symbol(mut self, symbol: char) -> Self {
        self.symbol = symbol;
        self
    }
}

/// Plots configurations projected on two DOFs
pub struct Visualizer {
    figure: Figure,
    axes: (usize, usize),
    title: String,
    x_range: Option<(f64, f64)>,
    y_range: Option<(f64, f64)>,
    aspect_ratio: Option<f64>,
}

impl Visualizer {
    /// Visualizer projecting on DOFs 0 and 1
    pub fn new() -> Self {
        Self::with_axes(0, 1)
    }

    pub fn with_axes(x_dof: usize, y_dof: usize) -> Self {
        Self {
            figure: Figure::new(),
            axes: (x_dof, y_dof),
            title: String::new(),
            x_range: None,
            y_range: None,
            aspect_ratio: Some(1.0),
        }
    }

    pub fn set_title(&mut self, title: &str) -> &mut Self {
        self.title = title.to_string();
        self
    }

    pub fn set_x_range(&mut self, min: f64, max: f64) -> &mut Self {
        self.x_range = Some((min, max));
        self
    }

    pub fn set_y_range(&mut self, min: f64, max: f64) -> &mut Self {
        self.y_range = Some((min, max));
        self
    }

    /// Set aspect ratio (None for auto)
    pub fn set_aspect_ratio(&mut self, ratio: Option<f64>) -> &mut Self {
        self.aspect_ratio = ratio;
        self
    }

    /// Projection of `q`, `None` when it lacks one of the axes
    pub fn project(&self, q: &[f64]) -> Option<(f64, f64)> {
        Some((*q.get(self.axes.0)?, *q.get(self.axes.1)?))
    }

    fn project_all<'a>(&self, configs: impl Iterator<Item = &'a [f64]>) -> (Vec<f64>, Vec<f64>) {
        configs.filter_map(|q| self.project(q)).unzip()
    }

    pub fn plot_trajectory(&mut self, traj: &Trajectory, style: &PathStyle) -> &mut Self {
        let (x, y) = self.project_all(traj.configurations());
        self.figure.axes2d().lines(
            &x,
            &y,
            &[Caption(&style.caption), Color(&style.color), LineWidth(style.line_width)],
        );
        self
    }

    /// Plot every tree edge
    pub fn plot_tree(&mut self, nodes: &[RrtNode]) -> &mut Self {
        for node in nodes {
            let Some(parent) = node.parent else {
                continue;
            };
            let edge = [nodes[parent].config.as_slice(), node.config.as_slice()];
            let (x, y) = self.project_all(edge.into_iter());
            self.figure
                .axes2d()
                .lines(&x, &y, &[Color(colors::TREE), LineWidth(0.5)]);
        }
        self
    }

    /// Plot circular obstacles as outlines
    pub fn plot_disks(&mut self, disks: &[(f64, f64, f64)]) -> &mut Self {
        for &(cx, cy, r) in disks {
            let (x, y): (Vec<f64>, Vec<f64>) = (0..=64)
                .map(|i| {
                    let t = i as f64 / 64.0 * std::f64::consts::TAU;
                    (cx + r * t.cos(), cy + r * t.sin())
                })
                .unzip();
            self.figure
                .axes2d()
                .lines(&x, &y, &[Color(colors::OBSTACLE), LineWidth(1.5)]);
        }
        self
    }

    pub fn plot_point(&mut self, q: &[f64], style: &PointStyle) -> &mut Self {
        if let Some((x, y)) = self.project(q) {
            self.figure.axes2d().points(
                &[x],
                &[y],
                &[
                    Caption(&style.caption),
                    Color(&style.color),
                    PointSymbol(style.symbol),
                    PointSize(style.size),
                ],
            );
        }
        self
    }

    pub fn plot_start(&mut self, q: &[f64]) -> &mut Self {
        self.plot_point(q, &PointStyle::new(colors::START, "Start").with_size(1.5))
    }

    pub fn plot_goal(&mut self, q: &[f64]) -> &mut Self {
        self.plot_point(q, &PointStyle::new(colors::GOAL, "Goal").with_size(1.5).with_symbol('x'))
    }

    /// Save plot to PNG file
    pub fn save_png(&mut self, path: &str, width: u32, height: u32) -> PlanningResult<()> {
        self.apply_settings();
        self.figure
            .save_to_png(path, width, height)
            .map_err(|e| PlanningError::collaborator(format!("gnuplot: {}", e)))
    }

    fn apply_settings(&mut self) {
        let title = self.title.clone();
        let x_label = format!("q[{}]", self.axes.0);
        let y_label = format!("q[{}]", self.axes.1);
        let (x_range, y_range, aspect_ratio) = (self.x_range, self.y_range, self.aspect_ratio);
        let axes = self.figure.axes2d();

        if !title.is_empty() {
            axes.set_title(&title, &[]);
        }
        axes.set_x_label(&x_label, &[]);
        axes.set_y_label(&y_label, &[]);

        if let Some((min, max)) = x_range {
            axes.set_x_range(AutoOption::Fix(min), AutoOption::Fix(max));
        }
        if let Some((min, max)) = y_range {
            axes.set_y_range(AutoOption::Fix(min), AutoOption::Fix(max));
        }
        if let Some(ratio) = aspect_ratio {
            axes.set_aspect_ratio(AutoOption::Fix(ratio));
        }
    }
}

impl Default for Visualizer {
    fn default() -> Self {
        Self::new()
    }
}
