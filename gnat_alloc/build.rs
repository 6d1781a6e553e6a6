use std::env::{self, VarError};
use std::fs::File;
use std::io::Write;
use std::path::Path;

const DEFAULT_STATIC_HEAP_BYTES: u32 = 1024 * 32;
const GNAT_ALLOC_STATIC_HEAP_BYTES: &str = "GNAT_ALLOC_STATIC_HEAP_BYTES";

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR environment variable not provided");
    let dest_path = Path::new(&out_dir).join("gnat_alloc_static_heap_bytes.txt");

    let size: u32 = match env::var(GNAT_ALLOC_STATIC_HEAP_BYTES) {
        Ok(s) => s
            .parse()
            .expect("Could not interpret GNAT_ALLOC_STATIC_HEAP_BYTES as a 32 bit unsigned integer"),
        Err(VarError::NotPresent) => DEFAULT_STATIC_HEAP_BYTES,
        Err(VarError::NotUnicode(_)) => {
            panic!("Could not interpret GNAT_ALLOC_STATIC_HEAP_BYTES as a string")
        }
    };

    let mut f =
        File::create(&dest_path).expect("Could not create the static heap size metadata file");
    write!(f, "{}", size).expect("Could not write the static heap size metadata file");

    println!("cargo:rerun-if-env-changed={}", GNAT_ALLOC_STATIC_HEAP_BYTES);
    println!("cargo:rerun-if-changed=build.rs");
}
