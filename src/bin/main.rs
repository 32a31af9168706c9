fn main() {
    livelogs::main();
}
