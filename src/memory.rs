pub const MEMORY_SIZE: usize = 0x10000;

pub struct Memory {
    data: Box<[u8]>, // 64KB memory space
}

impl Memory {
    pub fn new() -> Self {
        Memory {
            data: vec![0; MEMORY_SIZE].into_boxed_slice(),
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        self.data[address as usize]
    }

    pub fn write(&mut self, address: u16, value: u8) {
        self.data[address as usize] = value;
    }

    // Copy a program image into memory, stopping at the top of the address space
    pub fn load_program(&mut self, data: &[u8], start_address: u16) -> usize {
        let start = start_address as usize;
        let end = (start + data.len()).min(MEMORY_SIZE);
        let len = end - start;
        self.data[start..end].copy_from_slice(&data[..len]);
        len
    }

    // Read a 16-bit value in little-endian format
    pub fn read_u16(&self, address: u16) -> u16 {
        let low = self.read(address) as u16;
        let high = self.read(address.wrapping_add(1)) as u16;
        (high << 8) | low
    }

    // Write a 16-bit value in little-endian format
    pub fn write_u16(&mut self, address: u16, value: u16) {
        self.write(address, (value & 0xFF) as u8);
        self.write(address.wrapping_add(1), (value >> 8) as u8);
    }

    /// Reads `length` bytes starting at `address`, wrapping at the top of memory.
    pub fn read_range(&self, address: u16, length: usize) -> Vec<u8> {
        (0..length)
            .map(|i| self.read(address.wrapping_add(i as u16)))
            .collect()
    }

    /// Address of the highest nonzero cell, if any.
    pub fn highest_nonzero(&self) -> Option<u16> {
        self.data.iter().rposition(|&b| b != 0).map(|i| i as u16)
    }

    /// The byte image from address 0 up to and including the highest nonzero cell.
    pub fn program_image(&self) -> Vec<u8> {
        match self.highest_nonzero() {
            Some(top) => self.data[..=top as usize].to_vec(),
            None => Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("size", &self.data.len())
            .field("highest_nonzero", &self.highest_nonzero())
            .finish()
    }
}
