use std::sync::OnceLock;

use rand::{distributions::Alphanumeric, seq::SliceRandom, Rng};

const ANIMALS: [&str; 4] = ["Lion", "Tiger", "Dog", "Cat"];

/// Supplies the display name attached to outgoing messages.
pub trait DisplayNameProvider: Send + Sync {
    fn display_name(&self) -> String;
}

/// `Anonymous-<Animal>-<5 alphanumerics>`, chosen once and then reused for
/// the rest of the session.
#[derive(Debug, Default)]
pub struct AnonymousNames {
    chosen: OnceLock<String>,
}

impl AnonymousNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generate() -> String {
        let mut rng = rand::thread_rng();
        let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("Cat");
        let suffix: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(5)
            .map(char::from)
            .collect();
        format!("Anonymous-{animal}-{suffix}")
    }
}

impl DisplayNameProvider for AnonymousNames {
    fn display_name(&self) -> String {
        self.chosen.get_or_init(Self::generate).clone()
    }
}

#[derive(Debug, Clone)]
pub struct FixedName(pub String);

impl DisplayNameProvider for FixedName {
    fn display_name(&self) -> String {
        self.0.clone()
    }
}
