fn main() {
    // tests/embedded.rs embeds this directory with `embed_migrations!`
    println!("cargo:rerun-if-changed=tests/fixtures/migrations");
}
