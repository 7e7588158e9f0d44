use rand::Rng;

/// Bytes read and written by a forward pass (src + dst).
pub fn fwd_rw_bytes(n: usize, elem_size: usize) -> u64 {
    2 * (n * elem_size) as u64
}

/// Bytes read and written by a backward pass (data + diff_dst + diff_src).
pub fn bwd_rw_bytes(n: usize, elem_size: usize) -> u64 {
    3 * (n * elem_size) as u64
}

/// Random f32 vector in [-1.0, 1.0).
pub fn random_f32_vec(n: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Random bf16 vector in [-1.0, 1.0).
pub fn random_bf16_vec(n: usize) -> Vec<half::bf16> {
    random_f32_vec(n).into_iter().map(half::bf16::from_f32).collect()
}
