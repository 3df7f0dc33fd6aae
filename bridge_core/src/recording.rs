use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use bevy::math::Vec3;
use tracing::{info, warn};

pub const REPORT_HEADER: &str = "timestep_time;vehicle_id;vehicle_x;vehicle_y;vehicle_z";

/// Slack subtracted from the sample interval so accumulated tick rounding
/// does not skip a sample.
const INTERVAL_SLACK: f32 = 0.002;

/// Periodic per-vehicle position log, active between start and stop
/// commands.
pub struct VehicleReport {
    writer: Option<Box<dyn Write + Send + Sync>>,
    sample_interval: f32,
    active: bool,
    accumulated: f32,
    origin: Option<f64>,
    lines_written: u64,
}

impl fmt::Debug for VehicleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VehicleReport")
            .field("enabled", &self.writer.is_some())
            .field("sample_interval", &self.sample_interval)
            .field("active", &self.active)
            .field("lines_written", &self.lines_written)
            .finish()
    }
}

impl VehicleReport {
    /// A report with no sink; start and stop are tracked but nothing is
    /// written.
    pub fn disabled() -> Self {
        Self {
            writer: None,
            sample_interval: 0.0,
            active: false,
            accumulated: 0.0,
            origin: None,
            lines_written: 0,
        }
    }

    pub fn create(path: &Path, sample_interval: f32) -> io::Result<Self> {
        let file = File::create(path)?;
        Self::from_writer(Box::new(BufWriter::new(file)), sample_interval)
    }

    pub fn from_writer(
        mut writer: Box<dyn Write + Send + Sync>,
        sample_interval: f32,
    ) -> io::Result<Self> {
        writeln!(writer, "{REPORT_HEADER}")?;
        Ok(Self {
            writer: Some(writer),
            sample_interval,
            active: false,
            accumulated: 0.0,
            origin: None,
            lines_written: 0,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Begins (or restarts) recording; the next logged sample becomes time
    /// zero.
    pub fn start(&mut self) {
        self.active = true;
        self.accumulated = 0.0;
        self.origin = None;
        info!(
            target: "traffic_bridge::lifecycle",
            enabled = self.is_enabled(),
            "recording.started"
        );
    }

    pub fn stop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush() {
                self.fail(err);
            }
        }
        info!(
            target: "traffic_bridge::lifecycle",
            lines = self.lines_written,
            "recording.stopped"
        );
    }

    /// Advances the sample timer by one tick and, when due, writes one line
    /// per row. Returns the number of lines written.
    pub fn tick<'a, I>(&mut self, now: f64, tick_seconds: f32, rows: I) -> usize
    where
        I: IntoIterator<Item = (&'a str, Vec3)>,
    {
        if !self.active || self.writer.is_none() {
            return 0;
        }
        self.accumulated += tick_seconds;
        if self.accumulated < self.sample_interval - INTERVAL_SLACK {
            return 0;
        }
        self.accumulated = 0.0;

        let origin = *self.origin.get_or_insert(now);
        let elapsed = now - origin;
        let result = match self.writer.as_mut() {
            Some(writer) => write_rows(writer.as_mut(), elapsed, rows),
            None => Ok(0),
        };
        match result {
            Ok(lines) => {
                self.lines_written += lines as u64;
                lines
            }
            Err(err) => {
                self.fail(err);
                0
            }
        }
    }

    fn fail(&mut self, err: io::Error) {
        warn!(
            target: "traffic_bridge::lifecycle",
            error = %err,
            "recording.write_failed"
        );
        self.writer = None;
        self.active = false;
    }
}

fn write_rows<'a, I>(writer: &mut dyn Write, elapsed: f64, rows: I) -> io::Result<usize>
where
    I: IntoIterator<Item = (&'a str, Vec3)>,
{
    let mut lines = 0;
    for (vehicle_id, position) in rows {
        writeln!(
            writer,
            "{elapsed:.3};{vehicle_id};{:.2};{:.2};{:.2}",
            position.x, position.y, position.z
        )?;
        lines += 1;
    }
    Ok(lines)
}

impl Drop for VehicleReport {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            let _ = writer.flush();
        }
    }
}
