//! Mix-buffer pool

/// Contiguous `count × sample_count` signed 32-bit buffers
#[derive(Debug, Clone)]
pub struct MixBufferPool {
    samples: Vec<i32>,
    count: usize,
    sample_count: usize,
}

impl MixBufferPool {
    pub fn new(count: usize, sample_count: usize) -> Self {
        Self {
            samples: vec![0; count * sample_count],
            count,
            sample_count,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn clear(&mut self) {
        self.samples.fill(0);
    }

    pub fn get(&self, index: usize) -> Option<&[i32]> {
        (index < self.count)
            .then(|| &self.samples[index * self.sample_count..(index + 1) * self.sample_count])
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut [i32]> {
        (index < self.count)
            .then(|| &mut self.samples[index * self.sample_count..(index + 1) * self.sample_count])
    }

    /// A source buffer and a distinct destination buffer
    pub fn pair_mut(&mut self, input: usize, output: usize) -> Option<(&[i32], &mut [i32])> {
        if input == output || input >= self.count || output >= self.count {
            return None;
        }
        let n = self.sample_count;
        if input < output {
            let (head, tail) = self.samples.split_at_mut(output * n);
            Some((&head[input * n..(input + 1) * n], &mut tail[..n]))
        } else {
            let (head, tail) = self.samples.split_at_mut(input * n);
            Some((&tail[..n], &mut head[output * n..(output + 1) * n]))
        }
    }

    /// Copy one buffer over another; no-op when they are the same
    pub fn copy(&mut self, input: usize, output: usize) {
        if let Some((source, destination)) = self.pair_mut(input, output) {
            destination.copy_from_slice(source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_mut_both_orders() {
        let mut pool = MixBufferPool::new(3, 2);
        pool.get_mut(0).unwrap().copy_from_slice(&[1, 2]);
        pool.get_mut(2).unwrap().copy_from_slice(&[5, 6]);

        let (source, destination) = pool.pair_mut(0, 2).unwrap();
        destination[0] += source[0];
        let (source, destination) = pool.pair_mut(2, 1).unwrap();
        destination.copy_from_slice(source);

        assert_eq!(pool.get(1).unwrap(), &[6, 6]);
        assert_eq!(pool.get(2).unwrap(), &[6, 6]);
        assert!(pool.pair_mut(1, 1).is_none());
        assert!(pool.pair_mut(0, 3).is_none());
    }

    #[test]
    fn test_copy_and_clear() {
        let mut pool = MixBufferPool::new(2, 3);
        pool.get_mut(0).unwrap().fill(7);
        pool.copy(0, 1);
        assert_eq!(pool.get(1).unwrap(), &[7, 7, 7]);
        pool.clear();
        assert!(pool.get(1).unwrap().iter().all(|&s| s == 0));
        assert!(pool.get(2).is_none());
    }
}
