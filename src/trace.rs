/// One captured waveform together with what was sent to and read from the target.
#[derive(Debug, Clone, PartialEq)]
pub struct Trace {
    wave: Vec<f64>,
    stimulus: Option<Vec<u8>>,
    response: Option<Vec<u8>>,
    key: Option<Vec<u8>>,
}

impl Trace {
    pub fn new(
        wave: Vec<f64>,
        stimulus: Option<Vec<u8>>,
        response: Option<Vec<u8>>,
        key: Option<Vec<u8>>,
    ) -> Self {
        Self {
            wave,
            stimulus,
            response,
            key,
        }
    }

    pub fn wave(&self) -> &[f64] {
        &self.wave
    }

    pub fn stimulus(&self) -> Option<&[u8]> {
        self.stimulus.as_deref()
    }

    /// `None` when the target never delivered its output frame.
    pub fn response(&self) -> Option<&[u8]> {
        self.response.as_deref()
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }
}
