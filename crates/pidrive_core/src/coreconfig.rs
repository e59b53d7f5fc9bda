/*
    PiDrive

    Copyright 2022-2025 Daniel Balsom

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    coreconfig.rs

    Defines the CoreConfig trait, used by front ends to hand configuration
    options to the drive core.

    Front end implementations must implement this trait for their specific
    configuration formats.
*/

use std::path::PathBuf;

use crate::drive_config::{DriveConfiguration, InputConfiguration, KernelConfiguration};

pub trait CoreConfig {
    fn get_base_dir(&self) -> PathBuf;
    fn get_drive_config(&self) -> &DriveConfiguration;
    fn get_kernel_config(&self) -> &KernelConfiguration;
    fn get_input_config(&self) -> &InputConfiguration;
    fn get_device_number(&self) -> u8 {
        self.get_drive_config().device_number
    }
    fn get_write_protect(&self) -> bool {
        self.get_drive_config().write_protect
    }
    fn get_rom_path(&self) -> Option<PathBuf> {
        self.get_drive_config().rom.clone()
    }
    fn get_image_path(&self) -> Option<PathBuf> {
        self.get_drive_config().image.clone()
    }
    fn get_trace_file(&self) -> Option<PathBuf>;
    fn get_max_cycles(&self) -> Option<u64>;
}
