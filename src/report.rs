use std::sync::Arc;

use image::RgbaImage;
use tracing::warn;

use crate::canvas::Canvas;
use crate::config::ReportConfig;
use crate::encode::save_png;
use crate::error::{Failure, ReportError};
use crate::executor::{Backend, QueryExecutor, ResultTable};
use crate::render::Renderer;
use crate::task::QueryTask;

#[cfg(feature = "mail")]
use crate::mail::Mailer;

/// What a failed panel does to the rest of the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The first failed panel aborts the report.
    FailFast,
    /// A failed panel becomes a one line placeholder and the report goes on.
    #[default]
    Degrade,
}

/// Lays the resolved tasks out on `canvas` in declared order.
///
/// Successful outcomes are rendered and appended as images. A failure, be it
/// from the executor or from the renderer, is either written as a
/// `label: reason` header or returned, depending on `policy`.
pub fn compose<R>(
    table: ResultTable,
    renderer: &R,
    mut canvas: Canvas,
    policy: FailurePolicy,
) -> Result<Canvas, ReportError>
where
    R: Renderer + ?Sized,
{
    for (task, outcome) in table.into_outcomes() {
        let chart = outcome.and_then(|data| {
            renderer
                .render(&data, &task.label, task.y_range)
                .map_err(Failure::Render)
        });

        match (chart, policy) {
            (Ok(image), _) => canvas.append_image(&image),
            (Err(failure), FailurePolicy::FailFast) => {
                return Err(ReportError::Panel {
                    label: task.label,
                    failure,
                });
            }
            (Err(failure), FailurePolicy::Degrade) => {
                warn!(label = %task.label, %failure, "panel degraded");
                canvas.write_header(&format!("{}: {}", task.label, failure.placeholder()));
            }
        }
    }

    Ok(canvas)
}

/// One report run: query, compose, save and optionally mail.
#[derive(Debug, Clone, Default)]
pub struct Report {
    config: ReportConfig,
}

impl Report {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReportConfig {
        &self.config
    }

    /// Resolves every task against `backend` and composes the results into
    /// a single image.
    pub fn generate<B, R>(
        &self,
        tasks: &[QueryTask],
        backend: Arc<B>,
        renderer: &R,
    ) -> Result<RgbaImage, ReportError>
    where
        B: Backend + ?Sized + 'static,
        R: Renderer + ?Sized,
    {
        let executor = QueryExecutor::new(self.config.concurrency, self.config.timeout)?;
        let table = executor.run(tasks, backend)?;

        let mut canvas =
            Canvas::with_layout(self.config.width, self.config.height, self.config.layout);
        if let Some(title) = &self.config.title {
            canvas.write_header(title);
        }

        let canvas = compose(table, renderer, canvas, self.config.policy)?;
        Ok(canvas.into_image())
    }

    /// Writes the image to the configured PNG path.
    pub fn save(&self, image: &RgbaImage) -> Result<(), ReportError> {
        save_png(image, &self.config.png_path)?;
        Ok(())
    }

    /// Saves the image, then mails it if email is configured. The mailer is
    /// never called before the file exists.
    #[cfg(feature = "mail")]
    pub fn publish(&self, image: &RgbaImage, mailer: Option<&dyn Mailer>) -> Result<(), ReportError> {
        self.save(image)?;

        match (&self.config.email, mailer) {
            (Some(email), Some(mailer)) => {
                mailer.send(&self.config.png_path, &email.to, &email.subject, &email.body)?;
            }
            (Some(_), None) => warn!("email is configured but no mailer was given"),
            (None, _) => {}
        }

        Ok(())
    }
}
