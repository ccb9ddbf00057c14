use clap::Parser;
use std::path::PathBuf;

use crate::errors::{CoastSegError, Result};

/// Command line arguments. Every model-dependent value the training run baked
/// into the network (`TARGET_SIZE`, `N_DATA_BANDS`, `NCLASSES`, `USE_LOCATION`,
/// `BATCH_SIZE`) has to be given explicitly; `validate` turns them into
/// immutable [`Settings`].
#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Directory of `.jpg` (or, failing that, `.png`) images to segment
    pub sample_dir: PathBuf,

    #[arg(short, long)]
    pub model_path: PathBuf,

    /// Network input geometry, rows then columns
    #[arg(short, long, num_args = 2, value_names = ["ROWS", "COLS"], required = true)]
    pub target_size: Vec<u32>,

    /// Number of data bands the model was trained on (1, 3 or 4)
    #[arg(short, long)]
    pub bands: u8,

    #[arg(short, long)]
    pub nclasses: usize,

    /// Append a synthetic radial-distance band to the input
    #[arg(long, default_value_t = false)]
    pub use_location: bool,

    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Directory holding the near-infrared companion of each image
    #[arg(long)]
    pub nir_dir: Option<PathBuf>,

    /// Roll shifted ensemble predictions back before combining them
    #[arg(long, default_value_t = false)]
    pub reverse_shift: bool,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,
}

impl Config {
    pub fn validate(&self) -> Result<Settings> {
        if !self.sample_dir.is_dir() {
            return Err(CoastSegError::FileSystem {
                path: self.sample_dir.clone(),
                operation: "sample directory lookup".to_string(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "sample directory does not exist",
                ),
            });
        }
        if !self.model_path.is_file() {
            return Err(CoastSegError::MissingInput {
                path: self.model_path.clone(),
                role: "model file".to_string(),
            });
        }
        if let Some(nir_dir) = &self.nir_dir {
            if !nir_dir.is_dir() {
                return Err(CoastSegError::MissingInput {
                    path: nir_dir.clone(),
                    role: "near-infrared directory".to_string(),
                });
            }
        }

        let target = match self.target_size.as_slice() {
            &[rows, cols] => TargetSize::new(rows, cols)?,
            other => {
                return Err(CoastSegError::validation(
                    "target_size",
                    format!("expects two values, got {}", other.len()),
                ))
            }
        };
        let input = InputSpec::new(Bands::try_from(self.bands)?, self.use_location);

        let mut settings = Settings::new(self.sample_dir.clone(), target, input, self.nclasses)?
            .with_batch_size(self.batch_size)?
            .with_reverse_shift(self.reverse_shift);
        settings.model_path = self.model_path.clone();
        settings.device_id = self.device_id;
        if let Some(nir_dir) = &self.nir_dir {
            settings = settings.with_nir_dir(nir_dir.clone());
        }
        Ok(settings)
    }
}

/// Fixed network input geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetSize {
    pub rows: u32,
    pub cols: u32,
}

impl TargetSize {
    pub fn new(rows: u32, cols: u32) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(CoastSegError::validation(
                "target_size",
                format!("must be positive, got {rows}x{cols}"),
            ));
        }
        Ok(Self { rows, cols })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bands {
    One,
    Three,
    /// Three visible bands plus a near-infrared companion image
    Four,
}

impl Bands {
    pub const fn count(self) -> usize {
        match self {
            Self::One => 1,
            Self::Three => 3,
            Self::Four => 4,
        }
    }
}

impl TryFrom<u8> for Bands {
    type Error = CoastSegError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::One),
            3 => Ok(Self::Three),
            4 => Ok(Self::Four),
            other => Err(CoastSegError::validation(
                "bands",
                format!("must be 1, 3 or 4, got {other}"),
            )),
        }
    }
}

/// Shape of the tensor the model expects, consumed by the image loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    pub bands: Bands,
    pub with_location: bool,
}

impl InputSpec {
    pub const fn new(bands: Bands, with_location: bool) -> Self {
        Self {
            bands,
            with_location,
        }
    }

    pub const fn needs_companion(&self) -> bool {
        matches!(self.bands, Bands::Four)
    }

    pub const fn expected_channels(&self) -> usize {
        self.bands.count() + self.with_location as usize
    }

    /// Channels after standardization; a lone band is replicated to three.
    pub const fn network_channels(&self) -> usize {
        match self.expected_channels() {
            1 => 3,
            n => n,
        }
    }
}

/// Validated, immutable run settings shared by reference with every stage.
#[derive(Debug, Clone)]
pub struct Settings {
    pub sample_dir: PathBuf,
    pub model_path: PathBuf,
    pub target: TargetSize,
    pub input: InputSpec,
    pub nclasses: usize,
    pub batch_size: usize,
    pub nir_dir: Option<PathBuf>,
    pub reverse_shift: bool,
    pub device_id: i32,
}

impl Settings {
    pub fn new(
        sample_dir: PathBuf,
        target: TargetSize,
        input: InputSpec,
        nclasses: usize,
    ) -> Result<Self> {
        if nclasses == 0 {
            return Err(CoastSegError::validation("nclasses", "must be at least 1"));
        }
        Ok(Self {
            sample_dir,
            model_path: PathBuf::new(),
            target,
            input,
            nclasses,
            batch_size: 1,
            nir_dir: None,
            reverse_shift: false,
            device_id: 0,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(CoastSegError::validation("batch_size", "must be at least 1"));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn with_nir_dir(mut self, nir_dir: PathBuf) -> Self {
        self.nir_dir = Some(nir_dir);
        self
    }

    pub fn with_reverse_shift(mut self, reverse_shift: bool) -> Self {
        self.reverse_shift = reverse_shift;
        self
    }

    pub const fn is_binary(&self) -> bool {
        self.nclasses == 1
    }
}
