/// Represents the physical location where tensor data is resident.
///
/// The graph only decides *when* data has to be on the CPU; moving it to an
/// accelerator is left to accelerator-aware layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StorageDevice {
    /// Data is resident in main system memory (RAM).
    #[default]
    CPU,
    /// Data is resident in accelerator memory.
    GPU,
}
