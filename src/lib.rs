#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod backend;
mod canvas;
pub mod config;
pub mod dashboard;
mod encode;
mod error;
mod executor;
mod font;
#[cfg(feature = "mail")]
pub mod mail;
mod render;
mod report;
mod series;
mod task;
mod utils;

pub use crate::canvas::{BLACK, Canvas, Layout, WHITE};
pub use crate::config::{EmailConfig, ReportConfig};
pub use crate::encode::{decode_png, encode_png, save_png};
pub use crate::error::*;
pub use crate::executor::{Backend, Outcome, QueryExecutor, Resolved, ResultTable};
pub use crate::render::{LineChartRenderer, Renderer};
pub use crate::report::{FailurePolicy, Report, compose};
pub use crate::series::{Series, SeriesData};
pub use crate::task::{QueryTask, YRange};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;
pub use crate::utils::as_overhead;
