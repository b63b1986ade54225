use super::hash::Salt;

pub trait FromRandom {
    fn from_random() -> Self;
}

impl FromRandom for Salt {
    fn from_random() -> Self {
        Salt(random_string(32))
    }
}

pub fn random_string(size: usize) -> String {
    use rand::Rng;

    let s: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(size)
        .map(|b| b as char)
        .collect();
    base64::encode_config(s, base64::URL_SAFE_NO_PAD)
}
