use std::fmt;

use clap::ValueEnum;

/// Brain extraction method run by the pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum ExtractionMethod {
    #[value(name = "RPP")]
    Rpp,
    #[value(name = "SPP")]
    Spp,
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExtractionMethod::Rpp => write!(f, "RPP"),
            ExtractionMethod::Spp => write!(f, "SPP"),
        }
    }
}

/// Registration to the MNI reference space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum RegistrationMethod {
    #[value(name = "linear")]
    Linear,
    #[value(name = "nonlinear")]
    Nonlinear,
}

impl fmt::Display for RegistrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistrationMethod::Linear => write!(f, "linear"),
            RegistrationMethod::Nonlinear => write!(f, "nonlinear"),
        }
    }
}

/// Whether the pipeline should trust a user-supplied brain instead of extracting one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum CustomBrain {
    #[value(name = "NONE")]
    None,
    #[value(name = "MASK")]
    Mask,
    #[value(name = "CUSTOM")]
    Custom,
}

impl fmt::Display for CustomBrain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CustomBrain::None => write!(f, "NONE"),
            CustomBrain::Mask => write!(f, "MASK"),
            CustomBrain::Custom => write!(f, "CUSTOM"),
        }
    }
}
