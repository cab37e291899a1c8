fn main() {
    // PDFium is bound at runtime from the working directory or the system
    // library path, so there is nothing to link here.
    println!("cargo:rerun-if-changed=build.rs");
}
