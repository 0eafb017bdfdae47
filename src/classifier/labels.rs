use serde::{Deserialize, Serialize};
use std::fmt;

/// Class labels the models emit. Codes are fixed by training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowClass {
    /// The flow could not be classified
    Error,
    Normal,
    /// Generic HTTP DDoS attack
    Attack,
    SlowBody2,
    SlowRead,
    DdosSim,
    SlowHeaders,
    GoldenEye,
    Rudy,
    Hulk,
    Slowloris,
}

impl FlowClass {
    pub fn code(self) -> i32 {
        match self {
            FlowClass::Error => -1,
            FlowClass::Normal => 0,
            FlowClass::Attack => 1,
            FlowClass::SlowBody2 => 2,
            FlowClass::SlowRead => 3,
            FlowClass::DdosSim => 4,
            FlowClass::SlowHeaders => 5,
            FlowClass::GoldenEye => 6,
            FlowClass::Rudy => 7,
            FlowClass::Hulk => 8,
            FlowClass::Slowloris => 9,
        }
    }

    // Unknown codes decode to `Error`
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => FlowClass::Normal,
            1 => FlowClass::Attack,
            2 => FlowClass::SlowBody2,
            3 => FlowClass::SlowRead,
            4 => FlowClass::DdosSim,
            5 => FlowClass::SlowHeaders,
            6 => FlowClass::GoldenEye,
            7 => FlowClass::Rudy,
            8 => FlowClass::Hulk,
            9 => FlowClass::Slowloris,
            _ => FlowClass::Error,
        }
    }

    pub fn is_attack(self) -> bool {
        !matches!(self, FlowClass::Error | FlowClass::Normal)
    }
}

impl fmt::Display for FlowClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowClass::Error => "ERROR",
            FlowClass::Normal => "NORMAL",
            FlowClass::Attack => "ATTACK",
            FlowClass::SlowBody2 => "SLOWBODY2",
            FlowClass::SlowRead => "SLOWREAD",
            FlowClass::DdosSim => "DDOSSIM",
            FlowClass::SlowHeaders => "SLOWHEADERS",
            FlowClass::GoldenEye => "GOLDENEYE",
            FlowClass::Rudy => "RUDY",
            FlowClass::Hulk => "HULK",
            FlowClass::Slowloris => "SLOWLORIS",
        };
        f.write_str(name)
    }
}

/// What the dispatcher does with a classified flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ignore,
    RecordAttack,
}

pub fn disposition(class: FlowClass) -> Disposition {
    if class.is_attack() { Disposition::RecordAttack } else { Disposition::Ignore }
}
